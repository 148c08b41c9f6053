use crate::utils::error::Result;
use async_trait::async_trait;

/// Byte storage addressed by paths relative to the storage root.
pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
}

/// Extract/transform/load stages driven by [`crate::core::etl::EtlEngine`].
#[async_trait]
pub trait Pipeline: Send + Sync {
    type Extracted: Send;
    type Transformed: Send;

    fn name(&self) -> String;
    async fn extract(&self) -> Result<Self::Extracted>;
    async fn transform(&self, data: Self::Extracted) -> Result<Self::Transformed>;
    /// Returns the path of the main output.
    async fn load(&self, result: Self::Transformed) -> Result<String>;
}
