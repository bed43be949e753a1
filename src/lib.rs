#![doc = include_str!("../README.md")]

pub mod aggregate;
pub mod analyze;
pub mod apps;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod money;
pub mod options;
pub mod parser;
pub mod render;
pub mod service;
pub mod transport;

pub use analyze::{Comparison, Insight, TrendReport};
pub use apps::{App, AppAttributes};
pub use auth::{Credentials, TokenManager};
pub use cache::{MemoryCache, ReportCache};
pub use error::{AuthError, Error, Result};
pub use model::{AppSales, SalesReport, TrendAnalysis, TrendDirection};
pub use money::Money;
pub use options::{GroupBy, Period, ReportOptions, ReportType, TrendOptions};
pub use service::{SalesService, ServiceConfig};
pub use transport::{HttpClient, ReqwestClient, Transport};
