
pub mod activities;
pub mod auth;
pub mod client;
pub mod history;
pub mod models;
pub mod notifications;

pub use client::ApiClient;
pub use history::HistoryLoader;
pub use models::{
    Activity, AuthResponse, CreateActivityRequest, JoinRequest, Notification, Page, SignupRequest,
};
