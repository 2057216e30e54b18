//! Fixtures shared by the async tests: generated images and a local HTTP origin.

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// PNG bytes of a uniform gray image
pub fn png_bytes(width: u32, height: u32, level: u8) -> Vec<u8> {
    let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([level])));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// JPEG bytes of a uniform gray image
pub fn jpeg_bytes(width: u32, height: u32, level: u8) -> Vec<u8> {
    let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([level])));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

/// Image origin serving fixed bodies and counting requests
pub struct Origin {
    pub base_url: String,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Counters {
    fn enter(&self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Origin {
    /// Serve each `(path, body)`; `/missing` always answers 404
    pub async fn start(files: Vec<(&'static str, Vec<u8>)>) -> Self {
        Self::start_with_delay(files, Duration::ZERO).await
    }

    /// Like `start`, but every response is held back for `delay`
    pub async fn start_with_delay(files: Vec<(&'static str, Vec<u8>)>, delay: Duration) -> Self {
        let counters = Arc::new(Counters::default());
        let mut router = Router::new().route(
            "/missing",
            get({
                let counters = counters.clone();
                move || async move {
                    counters.enter();
                    tokio::time::sleep(delay).await;
                    counters.leave();
                    StatusCode::NOT_FOUND
                }
            }),
        );

        for (path, body) in files {
            let counters = counters.clone();
            router = router.route(
                path,
                get(move || {
                    let body = body.clone();
                    let counters = counters.clone();
                    async move {
                        counters.enter();
                        tokio::time::sleep(delay).await;
                        counters.leave();
                        body
                    }
                }),
            );
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            counters,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Number of requests served so far
    pub fn hits(&self) -> usize {
        self.counters.hits.load(Ordering::SeqCst)
    }

    /// Highest number of requests handled at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}
