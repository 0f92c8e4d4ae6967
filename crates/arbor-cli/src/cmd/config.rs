use crate::cmd::Loaded;
use crate::output::print_json;

/// Prints the merged configuration tree, as YAML or as JSON.
pub fn run(loaded: &Loaded, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(loaded.tree.as_value())
    } else {
        print!("{}", loaded.tree.to_yaml()?);
        Ok(())
    }
}
