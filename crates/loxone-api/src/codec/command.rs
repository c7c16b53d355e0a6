use crate::error::CodecError;
use crate::identifier::Identifier;

/// Longest command segment the Miniserver accepts.
pub const MAX_COMMAND_LEN: usize = 1024;

/// Build the `jdev/sps/io/{id}/{command}` path for a control command.
pub fn encode_command(target: &Identifier, command: &str) -> Result<String, CodecError> {
    if command.is_empty() {
        return Err(CodecError::invalid_command("command is empty"));
    }
    if command.len() > MAX_COMMAND_LEN {
        return Err(CodecError::invalid_command(format!(
            "command is {} bytes, limit is {MAX_COMMAND_LEN}",
            command.len()
        )));
    }
    if command.chars().any(char::is_control) {
        return Err(CodecError::invalid_command("command contains control characters"));
    }
    Ok(format!("jdev/sps/io/{target}/{command}"))
}
