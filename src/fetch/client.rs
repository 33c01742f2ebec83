use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes HTTP requests for the feed loader. Tests substitute canned
/// responses through this seam.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
