pub mod app_config;
pub mod link_config;

pub use app_config::AppConfig;
pub use link_config::LinkConfig;
