//! Release command - print the start-command YAML

use crate::cli::args::ReleaseArgs;
use crate::error::ShimResult;
use crate::phases::Releaser;

/// Execute the release command
pub async fn execute(args: ReleaseArgs) -> ShimResult<()> {
    let mut stdout = std::io::stdout();
    Releaser::new(&args.build_dir).release(&mut stdout).await
}
