//! HTTP surface of the PhishGuard prediction service.

pub mod server;


pub use server::{
    build_router, start_server, AppState, PredictRequest, PredictResponse, UrlPredictRequest,
    PHISHING_CLASS,
};
