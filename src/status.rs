//! Read-only handle over the fused output and the cry monitor.
//!
//! This is what an HTTP layer would serve: the latest still image, whether
//! any frame has been published, and the cry monitor state. Nothing here
//! fails because a component is disabled; absent components report a
//! well-formed "not initialized" state instead.

use crate::audio::{CryMonitor, CryState};
use crate::error::PublishError;
use crate::fusion::{FusedFrame, FusionPublisher};
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Boundary used between parts of the multipart video stream
pub const MJPEG_BOUNDARY: &str = "frame";

const NOT_INITIALIZED_REASON: &str = "detector not initialized";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoStatus {
    pub publisher_initialized: bool,
    pub has_frame: bool,
}

/// Cry monitor state as served to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CryStatus {
    pub initialized: bool,
    #[serde(flatten)]
    pub state: CryState,
}

#[derive(Clone)]
pub struct StatusSurface {
    publisher: Option<Arc<FusionPublisher>>,
    cry_monitor: Option<Arc<CryMonitor>>,
    first_frame_timeout: Duration,
}

impl StatusSurface {
    pub fn new(first_frame_timeout: Duration) -> Self {
        Self {
            publisher: None,
            cry_monitor: None,
            first_frame_timeout,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<FusionPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_cry_monitor(mut self, cry_monitor: Arc<CryMonitor>) -> Self {
        self.cry_monitor = Some(cry_monitor);
        self
    }

    pub fn first_frame_timeout(&self) -> Duration {
        self.first_frame_timeout
    }

    /// Latest fused JPEG, waiting up to the first-frame timeout for one
    pub async fn latest_jpeg(&self) -> Result<Bytes, PublishError> {
        let publisher = self.publisher.as_ref().ok_or(PublishError::NotInitialized)?;

        if let Some(jpeg) = publisher.latest_jpeg() {
            return Ok(jpeg);
        }

        debug!(
            "No fused frame yet, waiting up to {:?}",
            self.first_frame_timeout
        );
        publisher
            .wait_for_frame(self.first_frame_timeout)
            .await
            .map(|frame| frame.jpeg.clone())
            .ok_or(PublishError::NotReady {
                waited: self.first_frame_timeout,
            })
    }

    pub fn video_status(&self) -> VideoStatus {
        VideoStatus {
            publisher_initialized: self.publisher.is_some(),
            has_frame: self
                .publisher
                .as_ref()
                .is_some_and(|publisher| publisher.has_frame()),
        }
    }

    pub fn cry_status(&self) -> CryStatus {
        match &self.cry_monitor {
            Some(monitor) => CryStatus {
                initialized: true,
                state: monitor.state(),
            },
            None => CryStatus {
                initialized: false,
                state: CryState::disabled(NOT_INITIALIZED_REASON),
            },
        }
    }

    /// Follow fused frames as they are published, for streaming clients
    pub fn subscribe_frames(&self) -> Option<watch::Receiver<Option<Arc<FusedFrame>>>> {
        self.publisher.as_ref().map(|publisher| publisher.subscribe())
    }
}

pub fn mjpeg_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY)
}

/// Frame one JPEG as a part of the multipart video stream
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        jpeg.len()
    );

    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}
