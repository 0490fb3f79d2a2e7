pub mod body;
pub mod body_index;
pub mod body_stream;
pub mod color;
pub mod decoder;
pub mod depth;
pub mod device;
pub mod frame;
pub mod infrared;
pub mod stream;

pub use body::{Body, Bone, BoneStyle, HandState, Joint, JointType, RawBody, TrackingState, BODY_COUNT};
pub use body_index::{BodyIndexPixels, BodyIndexStream};
pub use body_stream::BodyStream;
pub use color::ColorStream;
pub use depth::{remap_to_range, DepthStream};
pub use device::Device;
pub use frame::{ColorFormat, ColorPixels, Frame, Modality, PixelFormat, ShortPixels};
pub use infrared::IrStream;
pub use stream::{Stream, StreamKind, StreamState, StreamStats};
