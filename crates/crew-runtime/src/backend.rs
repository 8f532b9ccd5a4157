use crate::types::{
    BuildOptions, Container, ContainerFilter, ContainerOptions, ExecOptions, ExecOutput,
    LogOptions,
};
use crate::Result;
use std::io::Read;
use std::time::Duration;

/// Log bytes from a container, stdout first then stderr.
pub type LogStream = Box<dyn Read + Send>;

pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    fn create(&self, opts: &ContainerOptions) -> Result<String>;

    fn start(&self, id: &str) -> Result<()>;

    fn stop(&self, id: &str, timeout: Duration) -> Result<()>;

    fn remove(&self, id: &str, force: bool) -> Result<()>;

    fn list(&self, filter: &ContainerFilter) -> Result<Vec<Container>>;

    fn inspect(&self, id_or_name: &str) -> Result<Container>;

    /// Streams logs. With `follow` the stream ends only when the container stops.
    fn logs(&self, id: &str, opts: &LogOptions) -> Result<LogStream>;

    /// A non-zero exit is reported through [`ExecOutput::exit_code`], not as an error.
    fn exec(&self, id: &str, cmd: &[String], opts: &ExecOptions) -> Result<ExecOutput>;

    fn commit(&self, id: &str, image: &str) -> Result<()>;

    fn build_image(&self, tag: &str, opts: &BuildOptions) -> Result<()>;

    fn pull_image(&self, image: &str) -> Result<()>;

    fn image_exists(&self, image: &str) -> Result<bool>;

    fn tag_image(&self, source: &str, target: &str) -> Result<()>;

    fn list_images(&self, prefix: &str) -> Result<Vec<String>>;
}
