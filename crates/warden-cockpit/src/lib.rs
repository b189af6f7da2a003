//! `warden-cockpit` – The HTTP JSON API
//!
//! Boots an axum router on a hyper HTTP/1.1 server (default port `8080`)
//! that exposes the device state and the peripherals.  POST bodies are JSON
//! and must be sent as `application/json`:
//!
//! | Method & path | Response |
//! |---|---|
//! | `GET /` | `{os, cpu_temperature}` |
//! | `GET /t` | `{temperature: "23.19 C" \| null}` |
//! | `POST /t/history` | `{history: [[iso, value], …]}` for `{begin, end}` |
//! | `POST /t/history.jpeg` | hourly-mean chart of the same range |
//! | `GET /check-internet` | `{ok}` |
//! | `GET /photo.png` | current camera frame, 404 when unavailable |
//! | `GET /photo-events` | drains motion events as `{data: {iso: score}}` |
//! | `POST /gpio` | manual pin command → `{changed, errors?}` |
//! | `GET /gpio-state` | `{pins, pins_schedule, pins_time}` |
//! | `POST /gpio-schedule` | schedule command → `{schedule, errors?}` |
//! | `GET /values` | the shared value bag |
//!
//! When an allow-list is configured, requests must name a listed client in
//! the `X-Warden-Client` header.  Errors come back as `{"error": "…"}` with
//! 400, 403, 404, 405, 408, 413 or 415 as fits.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden_cockpit::{ApiContext, ApiServer};
//!
//! # async fn serve(ctx: ApiContext) {
//! ApiServer::new(Arc::new(ctx))
//!     .with_port(8080)
//!     .run()
//!     .await
//!     .expect("api server failed");
//! # }
//! ```

pub mod chart;
pub mod server;

pub use server::{ApiContext, ApiError, ApiServer, CLIENT_HEADER, DEFAULT_PORT};
