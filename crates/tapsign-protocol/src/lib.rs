pub mod engine;
pub mod error;
pub mod message;
pub mod mock;
pub mod protocols;
pub mod sequencer;
pub mod token;

pub use engine::{CardProtocolEngine, EngineEvent, EngineOutcome};
pub use error::{ProtocolError, Result};
pub use message::ProtocolMessage;
pub use mock::MockToken;
pub use protocols::AnyProtocol;
pub use sequencer::MessageSequencer;
pub use token::TokenProtocol;
