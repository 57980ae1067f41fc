//! Push notifications: rendering inbound payloads and routing clicks.

mod payload;
mod renderer;
mod router;
pub(crate) mod surface;

pub use payload::{Category, NotificationAction, NotificationPayload, PushData, DEFAULT_TAG};
pub use renderer::{NotificationData, RenderedNotification, Renderer};
pub use router::{ActionEvent, ActionRouter, RouteOutcome};
pub use surface::{NotificationDisplay, PresentationSurface, SurfaceInfo};
