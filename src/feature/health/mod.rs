pub mod health_api;
