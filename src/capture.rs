//! Camera capture and QR decoding capability.
//!
//! Decoding itself is delegated: either to a platform barcode detector or to
//! a software decoder fed with grayscale pixels. Both sit behind
//! [`CodeDetector`] so the coordinator never knows which one is wired in.
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::model::Notice;

const QR_FORMAT: &str = "qr_code";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera available")]
    NoCamera,
    #[error("detector unsupported: {0}")]
    Unsupported(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("camera stream failed: {0}")]
    Stream(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Luma8,
}

impl PixelFormat {
    fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Luma8 => 1,
        }
    }
}

/// A still image grabbed from the camera stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn check_len(&self) -> Result<(), CaptureError> {
        let expected = self.pixel_count() * self.format.bytes_per_pixel();
        if self.pixel_count() == 0 || self.data.len() != expected {
            return Err(CaptureError::InvalidFrame(format!(
                "{}x{} {:?} needs {} bytes, got {}",
                self.width,
                self.height,
                self.format,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// 8-bit luma plane; RGBA is weighted with BT.601 coefficients and alpha
    /// is ignored.
    pub fn to_luma(&self) -> Result<Vec<u8>, CaptureError> {
        self.check_len()?;
        Ok(match self.format {
            PixelFormat::Luma8 => self.data.clone(),
            PixelFormat::Rgba8 => self
                .data
                .chunks_exact(4)
                .map(|px| {
                    let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                    ((299 * r + 587 * g + 114 * b + 500) / 1000) as u8
                })
                .collect(),
        })
    }
}

#[async_trait]
pub trait CodeDetector: Send + Sync {
    /// Zero or one decoded text from `frame`. A miss is `None`, never an error.
    async fn try_decode(&self, frame: &Frame) -> Option<String>;
}

/// One result reported by a platform barcode detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCode {
    pub raw_value: String,
    pub format: String,
}

/// Platform-provided barcode detection (browser `BarcodeDetector`, OS vision
/// APIs and the like).
#[async_trait]
pub trait PlatformBarcodeApi: Send + Sync {
    fn is_supported(&self) -> bool;
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectedCode>, CaptureError>;
}

pub struct NativeDetector<P> {
    platform: P,
}

impl<P: PlatformBarcodeApi> NativeDetector<P> {
    /// Fails when the platform has no detector so callers can fall back.
    pub fn new(platform: P) -> Result<Self, CaptureError> {
        if !platform.is_supported() {
            return Err(CaptureError::Unsupported(
                "platform barcode detector".into(),
            ));
        }
        Ok(Self { platform })
    }
}

#[async_trait]
impl<P: PlatformBarcodeApi> CodeDetector for NativeDetector<P> {
    async fn try_decode(&self, frame: &Frame) -> Option<String> {
        match self.platform.detect(frame).await {
            Ok(codes) => codes
                .into_iter()
                .find(|c| c.format == QR_FORMAT && !c.raw_value.is_empty())
                .map(|c| c.raw_value),
            Err(err) => {
                debug!(%err, "platform detector failed on frame");
                None
            }
        }
    }
}

/// Software decoder operating on a grayscale plane.
pub trait LumaDecoder: Send + Sync {
    fn decode(&self, width: u32, height: u32, luma: &[u8]) -> Option<String>;
}

pub struct PixelDecoder<D> {
    decoder: D,
}

impl<D: LumaDecoder> PixelDecoder<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }
}

#[async_trait]
impl<D: LumaDecoder> CodeDetector for PixelDecoder<D> {
    async fn try_decode(&self, frame: &Frame) -> Option<String> {
        let luma = match frame.to_luma() {
            Ok(luma) => luma,
            Err(err) => {
                debug!(%err, "skipping frame");
                return None;
            }
        };
        self.decoder
            .decode(frame.width, frame.height, &luma)
            .filter(|text| !text.is_empty())
    }
}

/// Tries each detector in order and returns the first hit.
#[derive(Default)]
pub struct FallbackDetector {
    detectors: Vec<Box<dyn CodeDetector>>,
}

impl FallbackDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, detector: impl CodeDetector + 'static) -> Self {
        self.detectors.push(Box::new(detector));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

#[async_trait]
impl CodeDetector for FallbackDetector {
    async fn try_decode(&self, frame: &Frame) -> Option<String> {
        for detector in &self.detectors {
            if let Some(text) = detector.try_decode(frame).await {
                return Some(text);
            }
        }
        None
    }
}

#[async_trait]
pub trait CameraStream: Send {
    async fn grab_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Release the underlying device. Must be idempotent.
    fn stop(&mut self);
}

#[async_trait]
pub trait CameraProvider: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CameraStream>, CaptureError>;
}

/// Camera provider for hosts without a camera; always reports the reason.
#[derive(Debug, Clone)]
pub struct NoCamera {
    reason: CaptureError,
}

impl NoCamera {
    pub fn new(reason: CaptureError) -> Self {
        Self { reason }
    }
}

#[async_trait]
impl CameraProvider for NoCamera {
    async fn open(&self) -> Result<Box<dyn CameraStream>, CaptureError> {
        Err(self.reason.clone())
    }
}

pub enum CaptureState {
    Ready(ScanSession),
    /// Scanning is off; manual entry remains available.
    Unavailable(CaptureError),
}

pub struct Scanner {
    camera: Arc<dyn CameraProvider>,
    detector: Arc<dyn CodeDetector>,
    notices: broadcast::Sender<Notice>,
    repeat_cooldown: Duration,
    announced_unavailable: AtomicBool,
}

impl Scanner {
    pub fn new(
        camera: Arc<dyn CameraProvider>,
        detector: Arc<dyn CodeDetector>,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        Self {
            camera,
            detector,
            notices,
            repeat_cooldown: Duration::from_secs(3),
            announced_unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_repeat_cooldown(mut self, cooldown: Duration) -> Self {
        self.repeat_cooldown = cooldown;
        self
    }

    /// Acquire the camera. Failure is reported once as a notice and returned
    /// as [`CaptureState::Unavailable`].
    pub async fn activate(&self) -> CaptureState {
        match self.camera.open().await {
            Ok(stream) => {
                info!("camera stream acquired");
                CaptureState::Ready(ScanSession {
                    stream: Some(stream),
                    detector: self.detector.clone(),
                    repeat_cooldown: self.repeat_cooldown,
                    last: None,
                })
            }
            Err(err) => {
                if !self.announced_unavailable.swap(true, Ordering::SeqCst) {
                    warn!(%err, "camera unavailable; manual entry only");
                    let _ = self.notices.send(Notice::CameraUnavailable {
                        reason: err.to_string(),
                    });
                }
                CaptureState::Unavailable(err)
            }
        }
    }
}

/// An acquired camera stream. The device is released on drop.
pub struct ScanSession {
    stream: Option<Box<dyn CameraStream>>,
    detector: Arc<dyn CodeDetector>,
    repeat_cooldown: Duration,
    last: Option<(String, Instant)>,
}

impl ScanSession {
    /// Grab one frame and try to decode it.
    pub async fn scan_once(&mut self) -> Result<Option<String>, CaptureError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CaptureError::Stream("session released".into()))?;
        let frame = stream.grab_frame().await?;
        Ok(self.detector.try_decode(&frame).await)
    }

    /// Poll until a code turns up. The same text seen again within the
    /// cooldown is treated as a miss so one QR held in view submits once.
    pub async fn next_code(&mut self, poll_interval: Duration) -> Result<String, CaptureError> {
        loop {
            if let Some(text) = self.scan_once().await? {
                let now = Instant::now();
                let repeat = matches!(
                    &self.last,
                    Some((prev, at)) if *prev == text && now.duration_since(*at) < self.repeat_cooldown
                );
                self.last = Some((text.clone(), now));
                if !repeat {
                    return Ok(text);
                }
            } else {
                debug!("no code in frame");
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn release(mut self) {
        self.stop_stream();
    }

    fn stop_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("camera stream released");
        }
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct FakeStream {
        frames: VecDeque<Result<Frame, CaptureError>>,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CameraStream for FakeStream {
        async fn grab_frame(&mut self) -> Result<Frame, CaptureError> {
            self.frames
                .pop_front()
                .unwrap_or_else(|| Err(CaptureError::Stream("exhausted".into())))
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeCamera {
        frames: Mutex<Option<Vec<Result<Frame, CaptureError>>>>,
        stops: Arc<AtomicUsize>,
    }

    impl FakeCamera {
        fn with_frames(frames: Vec<Result<Frame, CaptureError>>) -> Self {
            Self {
                frames: Mutex::new(Some(frames)),
                stops: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl CameraProvider for FakeCamera {
        async fn open(&self) -> Result<Box<dyn CameraStream>, CaptureError> {
            let frames = self.frames.lock().unwrap().take().ok_or(CaptureError::NoCamera)?;
            Ok(Box::new(FakeStream {
                frames: frames.into(),
                stops: self.stops.clone(),
            }))
        }
    }

    /// Treats the first byte of the luma plane as "has code" and returns
    /// the frame size as text.
    struct MarkerDecoder;

    impl LumaDecoder for MarkerDecoder {
        fn decode(&self, width: u32, height: u32, luma: &[u8]) -> Option<String> {
            (luma[0] > 128).then(|| format!("code-{}x{}", width, height))
        }
    }

    struct FakePlatform {
        supported: bool,
        codes: Vec<DetectedCode>,
    }

    #[async_trait]
    impl PlatformBarcodeApi for FakePlatform {
        fn is_supported(&self) -> bool {
            self.supported
        }

        async fn detect(&self, _frame: &Frame) -> Result<Vec<DetectedCode>, CaptureError> {
            Ok(self.codes.clone())
        }
    }

    fn bright() -> Frame {
        Frame::new(2, 1, PixelFormat::Rgba8, vec![255, 255, 255, 255, 0, 0, 0, 255])
    }

    fn dark() -> Frame {
        Frame::new(2, 1, PixelFormat::Rgba8, vec![0; 8])
    }

    fn scanner(camera: Arc<FakeCamera>) -> (Scanner, broadcast::Receiver<Notice>) {
        let (tx, rx) = broadcast::channel(8);
        let scanner = Scanner::new(camera, Arc::new(PixelDecoder::new(MarkerDecoder)), tx)
            .with_repeat_cooldown(Duration::from_secs(60));
        (scanner, rx)
    }

    #[test]
    fn rgba_to_luma_weights() {
        let frame = Frame::new(
            3,
            1,
            PixelFormat::Rgba8,
            vec![255, 0, 0, 255, 0, 255, 0, 255, 0, 0, 255, 255],
        );
        assert_eq!(frame.to_luma().unwrap(), vec![76, 150, 29]);
    }

    #[test]
    fn short_frame_is_invalid() {
        let frame = Frame::new(2, 2, PixelFormat::Luma8, vec![0; 3]);
        assert!(matches!(frame.to_luma(), Err(CaptureError::InvalidFrame(_))));
    }

    #[tokio::test]
    async fn native_detector_keeps_only_qr() {
        let platform = FakePlatform {
            supported: true,
            codes: vec![
                DetectedCode {
                    raw_value: "0123456789".into(),
                    format: "ean_13".into(),
                },
                DetectedCode {
                    raw_value: "ANCHOR-001".into(),
                    format: QR_FORMAT.into(),
                },
            ],
        };
        let detector = NativeDetector::new(platform).unwrap();
        assert_eq!(detector.try_decode(&dark()).await.as_deref(), Some("ANCHOR-001"));
    }

    #[test]
    fn unsupported_platform_is_rejected() {
        let platform = FakePlatform {
            supported: false,
            codes: vec![],
        };
        assert!(matches!(
            NativeDetector::new(platform),
            Err(CaptureError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn fallback_uses_second_detector() {
        let native = NativeDetector::new(FakePlatform {
            supported: true,
            codes: vec![],
        })
        .unwrap();
        let detector = FallbackDetector::new()
            .with(native)
            .with(PixelDecoder::new(MarkerDecoder));
        assert_eq!(detector.try_decode(&bright()).await.as_deref(), Some("code-2x1"));
        assert_eq!(detector.try_decode(&dark()).await, None);
    }

    #[tokio::test]
    async fn next_code_skips_misses_and_repeats() {
        let camera = Arc::new(FakeCamera::with_frames(vec![
            Ok(dark()),
            Ok(bright()),
            Ok(bright()),
            Ok(dark()),
        ]));
        let (scanner, _rx) = scanner(camera.clone());
        let CaptureState::Ready(mut session) = scanner.activate().await else {
            panic!("camera should open");
        };
        let code = session.next_code(Duration::from_millis(1)).await.unwrap();
        assert_eq!(code, "code-2x1");

        // the repeat and the dark frame are skipped, then the stream runs dry
        let err = session.next_code(Duration::from_millis(1)).await.unwrap_err();
        assert_eq!(err, CaptureError::Stream("exhausted".into()));

        drop(session);
        assert_eq!(camera.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_stops_stream_once() {
        let camera = Arc::new(FakeCamera::with_frames(vec![]));
        let (scanner, _rx) = scanner(camera.clone());
        let CaptureState::Ready(session) = scanner.activate().await else {
            panic!("camera should open");
        };
        session.release();
        assert_eq!(camera.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_camera_is_announced_once() {
        let (tx, mut rx) = broadcast::channel(8);
        let scanner = Scanner::new(
            Arc::new(NoCamera::new(CaptureError::PermissionDenied)),
            Arc::new(FallbackDetector::new()),
            tx,
        );
        assert!(matches!(
            scanner.activate().await,
            CaptureState::Unavailable(CaptureError::PermissionDenied)
        ));
        assert!(matches!(
            scanner.activate().await,
            CaptureState::Unavailable(_)
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            Notice::CameraUnavailable {
                reason: "camera permission denied".into()
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
