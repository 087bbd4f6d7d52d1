use marksync_core::order;

use crate::error::CliError;

pub fn run_order_sort(keys: &[String]) -> Result<(), CliError> {
    if keys.is_empty() {
        return Err(CliError::EmptyOrderKeys);
    }
    for key in sort_keys(keys) {
        if order::is_valid(&key) {
            println!("{key}");
        } else {
            println!("{key}  (malformed)");
        }
    }
    Ok(())
}

/// Sibling order; malformed keys sink to the end in their input order
pub fn sort_keys(keys: &[String]) -> Vec<String> {
    let mut sorted = keys.to_vec();
    sorted.sort_by(|a, b| order::compare(a, b));
    sorted
}

pub fn run_order_between(
    parent: &str,
    after: Option<&str>,
    before: Option<&str>,
) -> Result<(), CliError> {
    let key = order::between(after, before, parent).ok_or_else(|| {
        CliError::NoRoomBetween(format!(
            "{} and {}",
            after.unwrap_or(parent),
            before.unwrap_or("the end")
        ))
    })?;
    println!("{key}");
    Ok(())
}
