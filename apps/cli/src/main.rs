//! Webmark CLI: fetch web pages and API descriptions as clean Markdown.
//!
//! Pages are reduced to their main content and converted to Markdown with
//! reading metrics; OpenAPI/Swagger documents are summarized.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
