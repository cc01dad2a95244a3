pub mod events;
pub mod gateway;
pub mod reminders;
pub mod transcribe;

pub use events::{EventParseError, InboundEvent, InboundPayload};
pub use gateway::{
    BookingNotice, ChunkPolicy, DeliveryAck, GatewayError, HandoffNotice, HttpMessageGateway,
    MessageGateway,
};
pub use reminders::{
    HttpReminderScheduler, NoopReminderScheduler, ReminderError, ReminderRequest, ReminderScheduler,
};
pub use transcribe::{HttpTranscriber, TranscribeError, Transcriber};
