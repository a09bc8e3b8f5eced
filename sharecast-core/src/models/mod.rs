pub mod event;
pub mod id;
pub mod stream;

pub use event::StreamEvent;
pub use id::{generate_id, ClientId, Identity, RoomId, StreamName};
pub use stream::{
    AudioInfo, ClientsResponse, MediaCapabilities, PublishInfo, RelayClientInfo,
    StreamDescriptor, StreamInfo, StreamsResponse, VideoInfo,
};
