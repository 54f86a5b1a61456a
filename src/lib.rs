//! labvault - GitLab backup by mirror clone
//!
//! labvault lists every group and project on a GitLab server and keeps one
//! `git clone --mirror` per project on local disk, one directory per group plus
//! a bucket for projects that belong to no group.
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`gitlab`]: GitLab API access and pagination
//! - [`layout`]: Where each project lands on disk
//! - [`mirror`]: Skip-or-clone decision for a single project
//! - [`backup`]: Orchestration of a full run and its summary
//! - [`health`]: Preflight checks

pub mod backup;
pub mod config;
pub mod gitlab;
pub mod health;
pub mod layout;
pub mod mirror;

pub use backup::{BackupEngine, BackupPlan, BackupSummary};
pub use config::Config;
pub use gitlab::{GitLabClient, Group, Listing, Project};
pub use health::HealthCheck;
pub use mirror::{GitCli, GitMirror, MirrorOutcome, ProjectMirror};
