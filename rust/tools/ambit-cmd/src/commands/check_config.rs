//! Check-config command implementation

use anyhow::Result;

use crate::utils::read_options_file;

pub fn run(path: &str) -> Result<()> {
    let options = read_options_file(path)?;
    println!("{}", serde_json::to_string_pretty(&options)?);
    Ok(())
}
