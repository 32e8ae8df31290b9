//! Generation socket session client

pub mod assembler;
mod error;
mod event;
pub mod message;
mod session;
pub mod state;

pub use assembler::{ContentAssembler, Section, SectionContent, Sections};
pub use error::{DisconnectReason, SessionError, SocketConnectionError};
pub use event::{EventStream, GenerationSnapshot, SessionEvent};
pub use session::GenerationSocketSession;
pub use state::{ConnectionState, Transition};
