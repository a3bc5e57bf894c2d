pub mod auth;
pub mod dashboard;
pub mod import;
pub mod kpi;
pub mod metrics;
pub mod patients;
pub mod recommend;
pub mod reports;
pub mod settings;
