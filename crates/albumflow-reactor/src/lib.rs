#![warn(missing_docs)]

//! AlbumFlow reactor subsystem: the reactors behind each subscription, queue
//! workers, pipeline wiring and the `albumflow` CLI

pub mod cli;
pub mod clients;
pub mod config;
pub mod error;
pub mod key;
pub mod logging;
pub mod notifier;
pub mod outcome;
pub mod pipeline;
pub mod reactors;
pub mod worker;

pub use clients::SharedClients;
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use key::{decode_object_key, ImageTypePolicy};
pub use notifier::{LogNotifier, MemoryNotifier, Notification, Notifier};
pub use outcome::ReactorOutcome;
pub use pipeline::{Pipeline, PipelineHandle, PipelineStats};
pub use reactors::{
    ChangeNotificationReactor, CreationReactor, DeletionReactor, Reactor, ReactorSubscriber,
    ReceivedReactor, UpdateReactor,
};
pub use worker::{BatchReport, ConfirmationFeed, QueueWorker, RejectionWorker, WorkerProgress};
