pub mod server;

use anyhow::Result;

#[derive(Debug)]
pub enum Action {
    Server(Box<server::Args>),
}

impl Action {
    /// Run the action to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying action fails
    pub async fn execute(self) -> Result<()> {
        match self {
            Self::Server(args) => server::execute(*args).await,
        }
    }
}
