mod settings;

pub use settings::{
    ConsumerSettings, DequeueKind, QueueSettings, Settings, StoreSettings, SubmissionKind,
};
