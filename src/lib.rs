//! droid-lane: a supervised build lane for Android app packaging.
//!
//! The lane accepts build requests, admits them through a bounded-capacity
//! governor, runs the native build tools (Gradle, Flutter) under a
//! supervisor that streams output and enforces timeouts, and publishes the
//! resulting APKs.
//!
//! Layering, bottom up:
//! - [`error`], [`config`], [`timeout`], [`progress`]: shared vocabulary
//! - [`governor`]: admission slots and the stall watchdog
//! - [`supervisor`]: one external process under timeout supervision
//! - [`pipeline`]: scaffolded-template and uploaded-archive builds
//! - [`service`]: one front door wiring all of the above together

pub mod config;
pub mod error;
pub mod governor;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod service;
pub mod supervisor;
pub mod timeout;

pub use config::LaneConfig;
pub use error::{AdmissionRefusal, LaneError, LaneResult, TimeoutKind};
pub use governor::{BuildGovernor, SlotGuard, SlotInfo};
pub use pipeline::scaffold::{CopyScaffolder, ProjectScaffolder, TemplateSpec};
pub use pipeline::ProjectKind;
pub use progress::ProgressSender;
pub use service::{BuildJob, BuildRequest, BuildService};
pub use supervisor::SupervisedCommand;
pub use timeout::TimeoutPolicy;
