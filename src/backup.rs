//! Backup Engine - orchestrates a full GitLab backup run
//!
//! A run fetches every listing exactly once, turns the results into a
//! [`BackupPlan`] (which project goes into which bucket), then mirrors the plan
//! in order. Counters live in a [`BackupSummary`] owned by the engine and are
//! updated from each mirror call's return value.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::gitlab::{GitLabClient, Group, ListingError, Project};
use crate::layout;
use crate::mirror::{GitMirror, MirrorOutcome, Progress, ProjectMirror};

/// A group together with the projects its listing returned
#[derive(Debug, Clone)]
pub struct GroupProjects {
    pub group: Group,
    pub projects: Vec<Project>,
}

/// A destination directory and the projects mirrored into it
#[derive(Debug, Clone)]
pub struct Bucket {
    /// Relative directory under the output root (may contain `/`)
    pub dir: String,
    /// Human readable name for logs
    pub label: String,
    /// Holds the projects no group claimed
    pub ungrouped: bool,
    pub projects: Vec<Project>,
}

impl Bucket {
    /// Short description for log lines
    pub fn describe(&self) -> String {
        if self.ungrouped {
            format!("ungrouped projects ({})", self.projects.len())
        } else {
            format!("group {} ({} projects)", self.label, self.projects.len())
        }
    }
}

/// Ordered assignment of every project to exactly one bucket
#[derive(Debug, Clone, Default)]
pub struct BackupPlan {
    pub buckets: Vec<Bucket>,
    pub total_groups: usize,
    /// Listings that were cut short while collecting the plan
    pub listing_errors: Vec<ListingError>,
}

impl BackupPlan {
    /// Build a plan from cached listings
    ///
    /// Groups keep their listing order and the ungrouped bucket comes last. A
    /// project claimed by an earlier group is dropped from later ones; the
    /// ungrouped bucket receives every project of `all_projects` no group
    /// claimed. `all_projects` is `None` when ungrouped projects are excluded.
    pub fn build(
        groups: Vec<GroupProjects>,
        all_projects: Option<Vec<Project>>,
        ungrouped_dir: &str,
        nested_groups: bool,
    ) -> Self {
        let total_groups = groups.len();
        let mut claimed = HashSet::new();
        let mut buckets = Vec::with_capacity(groups.len() + 1);

        for GroupProjects { group, projects } in groups {
            let dir = match (&group.full_path, nested_groups) {
                (Some(full_path), true) => full_path.clone(),
                _ => group.path.clone(),
            };

            let mut owned = Vec::with_capacity(projects.len());
            for project in projects {
                if claimed.insert(project.id) {
                    owned.push(project);
                } else {
                    warn!(
                        "Project {} is listed under more than one group, keeping the first",
                        project.display_name()
                    );
                }
            }

            buckets.push(Bucket {
                dir,
                label: group.name,
                ungrouped: false,
                projects: owned,
            });
        }

        if let Some(all_projects) = all_projects {
            let ungrouped: Vec<Project> = all_projects
                .into_iter()
                .filter(|project| claimed.insert(project.id))
                .collect();

            info!("Found {} ungrouped projects", ungrouped.len());

            if !ungrouped.is_empty() {
                buckets.push(Bucket {
                    dir: ungrouped_dir.to_string(),
                    label: ungrouped_dir.to_string(),
                    ungrouped: true,
                    projects: ungrouped,
                });
            }
        }

        let plan = Self {
            buckets,
            total_groups,
            listing_errors: Vec::new(),
        };
        plan.warn_on_shared_destinations();
        plan
    }

    pub fn total_projects(&self) -> usize {
        self.buckets.iter().map(|b| b.projects.len()).sum()
    }

    /// Every (bucket, project) pair in processing order
    pub fn entries(&self) -> impl Iterator<Item = (&Bucket, &Project)> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.projects.iter().map(move |project| (bucket, project)))
    }

    /// Destination of every planned project under `root`
    pub fn destinations(&self, root: &Path) -> Vec<(String, PathBuf)> {
        self.entries()
            .map(|(bucket, project)| {
                (
                    project.display_name().to_string(),
                    layout::destination(root, &bucket.dir, &project.path),
                )
            })
            .collect()
    }

    /// Projects whose destination an earlier entry already takes, mapped to
    /// the name of that earlier project
    ///
    /// Only the first project of a shared directory is ever cloned; the rest
    /// are reported as failures.
    pub fn shared_destinations(&self) -> HashMap<u64, String> {
        let mut owners: HashMap<PathBuf, &Project> = HashMap::new();
        let mut shared = HashMap::new();

        for (bucket, project) in self.entries() {
            let destination = layout::destination(Path::new(""), &bucket.dir, &project.path);
            match owners.entry(destination) {
                Entry::Occupied(owner) => {
                    shared.insert(project.id, owner.get().display_name().to_string());
                }
                Entry::Vacant(slot) => {
                    slot.insert(project);
                }
            }
        }

        shared
    }

    fn warn_on_shared_destinations(&self) {
        let shared = self.shared_destinations();
        for (_, project) in self.entries() {
            if let Some(owner) = shared.get(&project.id) {
                warn!(
                    "Project {} shares its destination with {} and will not be cloned; \
                     set backup.nested_groups to separate them",
                    project.display_name(),
                    owner
                );
            }
        }
    }
}

/// A project that could not be mirrored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedProject {
    pub name: String,
    pub path: PathBuf,
    pub error: String,
}

/// Results from a complete backup run
#[derive(Debug, Clone, Default)]
pub struct BackupSummary {
    pub total_groups: usize,
    pub total_projects: usize,
    pub cloned: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration: Duration,
    pub output_root: PathBuf,
    pub listing_errors: Vec<ListingError>,
    pub failures: Vec<FailedProject>,
}

impl BackupSummary {
    fn new(plan: &BackupPlan, output_root: &Path) -> Self {
        Self {
            total_groups: plan.total_groups,
            total_projects: plan.total_projects(),
            output_root: output_root.to_path_buf(),
            listing_errors: plan.listing_errors.clone(),
            ..Default::default()
        }
    }

    /// Count one mirror outcome
    pub fn record(&mut self, project: &Project, outcome: MirrorOutcome) {
        match outcome {
            MirrorOutcome::Cloned { .. } => self.cloned += 1,
            MirrorOutcome::Skipped { .. } => self.skipped += 1,
            MirrorOutcome::Failed { path, error } => {
                self.failed += 1;
                self.failures.push(FailedProject {
                    name: project.display_name().to_string(),
                    path,
                    error,
                });
            }
        }
    }

    pub fn processed(&self) -> usize {
        self.cloned + self.skipped + self.failed
    }

    /// No failed clone and no truncated listing
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.listing_errors.is_empty()
    }

    /// Emit the final statistics to the log
    pub fn log(&self) {
        let rule = "=".repeat(60);
        info!("{}", rule);
        info!("GitLab backup finished");
        info!("Total groups: {}", self.total_groups);
        info!("Total projects: {}", self.total_projects);
        info!("Cloned: {}", self.cloned);
        info!("Skipped: {}", self.skipped);
        info!("Failed: {}", self.failed);
        info!("Duration: {:.2}s", self.duration.as_secs_f64());
        info!("Backup directory: {}", self.output_root.display());

        for failure in &self.failures {
            error!("Failed: {} ({}): {}", failure.name, failure.path.display(), failure.error);
        }

        if !self.listing_errors.is_empty() {
            warn!(
                "{} listing(s) were incomplete; the totals above may be too low",
                self.listing_errors.len()
            );
            for listing_error in &self.listing_errors {
                warn!("Incomplete listing: {}", listing_error);
            }
        }
        info!("{}", rule);
    }
}

/// The engine that drives a backup run
pub struct BackupEngine {
    client: GitLabClient,
    mirror: ProjectMirror,
    output_root: PathBuf,
    include_ungrouped: bool,
    ungrouped_dir: String,
    nested_groups: bool,
    max_parallel: usize,
}

impl BackupEngine {
    /// Create an engine from configuration and a git capability
    pub fn new(config: &Config, git: Arc<dyn GitMirror>) -> Result<Self> {
        let client = GitLabClient::from_config(config)?;
        let token = config.resolve_token()?;

        Ok(Self {
            client,
            mirror: ProjectMirror::from_config(git, token, config),
            output_root: config.output_root(),
            include_ungrouped: config.backup.include_ungrouped,
            ungrouped_dir: config.backup.ungrouped_dir.clone(),
            nested_groups: config.backup.nested_groups,
            max_parallel: config.max_parallel(),
        })
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Run a complete backup: collect the plan, mirror it, log the summary
    pub async fn run(&self) -> Result<BackupSummary> {
        let start_time = Instant::now();
        info!("Starting GitLab backup into {}", self.output_root.display());

        tokio::fs::create_dir_all(&self.output_root)
            .await
            .with_context(|| {
                format!("Failed to create output directory: {}", self.output_root.display())
            })?;

        let plan = self.collect_plan().await;
        let mut summary = self.execute(&plan).await;
        summary.duration = start_time.elapsed();

        summary.log();
        Ok(summary)
    }

    /// Fetch groups and projects once and assign projects to buckets
    pub async fn collect_plan(&self) -> BackupPlan {
        let mut listing_errors = Vec::new();

        let groups = self.client.list_groups().await;
        listing_errors.extend(groups.error);

        let mut grouped = Vec::with_capacity(groups.items.len());
        for group in groups.items {
            let projects = self.client.list_group_projects(group.id).await;
            info!("Group {} has {} projects", group.name, projects.len());
            listing_errors.extend(projects.error);
            grouped.push(GroupProjects {
                group,
                projects: projects.items,
            });
        }

        // Without every group listing, projects of a failed group would look ungrouped
        let all_projects = if !self.include_ungrouped {
            None
        } else if !listing_errors.is_empty() {
            warn!(
                "Skipping ungrouped projects this run: {} group listing(s) are incomplete",
                listing_errors.len()
            );
            None
        } else {
            let projects = self.client.list_projects().await;
            listing_errors.extend(projects.error);
            Some(projects.items)
        };

        let mut plan =
            BackupPlan::build(grouped, all_projects, &self.ungrouped_dir, self.nested_groups);
        plan.listing_errors = listing_errors;

        info!("{} projects to process", plan.total_projects());
        plan
    }

    /// Mirror every project of the plan, in plan order
    pub async fn execute(&self, plan: &BackupPlan) -> BackupSummary {
        let total = plan.total_projects();
        let shared = plan.shared_destinations();
        let mut summary = BackupSummary::new(plan, &self.output_root);

        // Bucket lines are logged as the stream reaches each bucket, empty ones included
        let entries = plan.buckets.iter().flat_map(|bucket| {
            info!("Processing {}", bucket.describe());
            bucket.projects.iter().map(move |project| (bucket, project))
        });

        let jobs = entries.enumerate().map(|(index, (bucket, project))| {
            let progress = Progress::new(index + 1, total);
            let owner = shared.get(&project.id).cloned();
            async move {
                let outcome = match owner {
                    Some(owner) => self.refuse_shared(bucket, project, &owner, progress),
                    None => self.mirror_one(bucket, project, progress).await,
                };
                (project, outcome)
            }
        });

        // Results come back in plan order even when clones overlap
        let mut results = stream::iter(jobs).buffered(self.max_parallel);
        while let Some((project, outcome)) = results.next().await {
            debug!("{} done: {}", project.display_name(), outcome.path().display());
            summary.record(project, outcome);
        }

        summary
    }

    fn refuse_shared(
        &self,
        bucket: &Bucket,
        project: &Project,
        owner: &str,
        progress: Progress,
    ) -> MirrorOutcome {
        let error = format!("destination shared with {}", owner);
        error!("{}Not cloning {}: {}", progress, project.display_name(), error);
        MirrorOutcome::Failed {
            path: layout::destination(&self.output_root, &bucket.dir, &project.path),
            error,
        }
    }

    async fn mirror_one(&self, bucket: &Bucket, project: &Project, progress: Progress) -> MirrorOutcome {
        match layout::resolve(&self.output_root, &bucket.dir, &project.path) {
            Ok(destination) => self.mirror.mirror(project, &destination, progress).await,
            Err(e) => {
                error!("{}Cannot prepare destination for {}: {:#}", progress, project.display_name(), e);
                MirrorOutcome::Failed {
                    path: layout::destination(&self.output_root, &bucket.dir, &project.path),
                    error: format!("{:#}", e),
                }
            }
        }
    }
}
