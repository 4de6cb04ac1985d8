pub mod broadcast;
pub mod controller;
pub mod density;
pub mod error;
pub mod inbound;
pub mod participants;
pub mod pulse;
pub mod score;
pub mod session;
pub mod settings;
pub mod signal;
pub mod visualization;

pub use controller::{Controller, ControllerHandle};
pub use error::BrainError;
pub use score::{FileScoreSource, ScoreSource, StaticScoreSource};
pub use session::SessionSnapshot;
pub use settings::Settings;
