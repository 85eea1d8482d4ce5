//! Key command - print resolved cache keys

use crate::cache::{TemplateContext, TemplateResolver};
use crate::cli::args::KeyArgs;
use crate::error::StowawayResult;

/// Execute the key command
///
/// Prints one resolved key per line, in argument order, so the output can be
/// captured by scripts.
pub fn execute(args: KeyArgs) -> StowawayResult<()> {
    let resolver = TemplateResolver::new(TemplateContext::from_process()?);

    let keys = args
        .templates
        .iter()
        .map(|template| resolver.resolve(template))
        .collect::<Result<Vec<_>, _>>()?;

    for key in keys {
        println!("{}", key);
    }
    Ok(())
}
