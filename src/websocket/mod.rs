//! WebSocket Real-Time Streaming
//!
//! Streams broadcast payloads to every connected viewer.
//!
//! ## Architecture
//!
//! - **ConnectionHub**: single coordination task owning the session set
//! - **Session**: per-connection inbound (liveness) and outbound (write) loops
//! - **OutboundQueue**: bounded per-session queue with an overflow policy
//! - **Handler**: axum upgrade glue for `GET /ws`
//!
//! ## Example
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:3000/ws');
//!
//! ws.onmessage = (event) => {
//!   // One frame may carry several newline-separated readings
//!   for (const line of event.data.split('\n')) {
//!     console.log('Reading:', JSON.parse(line));
//!   }
//! };
//! ```

mod handler;
mod hub;
mod queue;
mod session;
mod transport;

pub use handler::websocket_handler;
pub use hub::{ConnectionHub, HubConfig, HubError, HubState, SessionId};
pub use queue::{OutboundQueue, OverflowPolicy, Payload, PushOutcome};
pub use session::{coalesce, Session, SessionConfig, SessionEnd, PAYLOAD_DELIMITER};
pub use transport::{Frame, FrameSink, FrameStream, TransportError};
