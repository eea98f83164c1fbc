//! Plain-text notice block for headless, CI and log-captured runs

use std::fmt::Display;
use std::io::{self, Write};

use super::Notice;

/// Opening and closing line of the block
pub const DELIMITER: &str =
    "============================================================";

/// Write the notice as a delimited block: title, message, claim name, error
pub fn write_block<W: Write + ?Sized>(
    out: &mut W,
    notice: &Notice,
    error: &dyn Display,
) -> io::Result<()> {
    writeln!(out, "{}", DELIMITER)?;
    writeln!(out, "{}", notice.title)?;
    writeln!(out, "{}", notice.message)?;
    writeln!(out, "Claim: {}", notice.claim_name)?;
    writeln!(out, "Error: {}", error)?;
    writeln!(out, "{}", DELIMITER)?;
    out.flush()
}
