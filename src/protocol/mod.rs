//! Wire format of the realtime speech service: JSON text frames tagged by `type`.

pub mod events;
pub mod messages;

pub use events::ServerEvent;
pub use messages::{
    AudioFormat, ClientEvent, ContentPart, ConversationItem, SessionConfiguration, TurnDetection,
};
