//! Program image files.
//!
//! An image is an assembled [`Program`] stored as JSON, so it can be run or
//! disassembled without the source:
//!
//! ```json
//! {"functions":[["main",[20,6,0,4,255]]],"byte_count":5}
//! ```

use crate::asm::builder::Program;
use std::path::Path;
use thiserror::Error;

/// Parse an image from its JSON text.
pub fn parse_image(json: &str) -> Result<Program, ImageError> {
    let program: Program =
        serde_json::from_str(json).map_err(|e| ImageError::Parse(e.to_string()))?;

    let actual: usize = program.functions.iter().map(|(_, bytes)| bytes.len()).sum();
    if actual != program.byte_count {
        return Err(ImageError::Parse(format!(
            "byte_count is {} but functions hold {} bytes",
            program.byte_count, actual
        )));
    }
    Ok(program)
}

/// Load an image from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Program, ImageError> {
    let json = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ImageError::Io(e.to_string()))?;
    parse_image(&json)
}

/// Save a program as an image.
pub fn save_image<P: AsRef<Path>>(path: P, program: &Program) -> Result<(), ImageError> {
    let json = serde_json::to_string_pretty(program)
        .map_err(|e| ImageError::Parse(e.to_string()))?;
    std::fs::write(path.as_ref(), json).map_err(|e| ImageError::Io(e.to_string()))
}

/// Errors that can occur reading or writing images.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assembler::assemble;

    #[test]
    fn test_parse_image() {
        let program = parse_image(r#"{"functions":[["main",[20,6,0,4,255]]],"byte_count":5}"#).unwrap();
        assert_eq!(program.function("main").unwrap(), &[0x14, 6, 0, 4, 0xFF]);
    }

    #[test]
    fn test_byte_count_checked() {
        let err = parse_image(r#"{"functions":[["main",[255]]],"byte_count":3}"#).unwrap_err();
        assert!(matches!(err, ImageError::Parse(_)));
        assert!(matches!(parse_image("not json"), Err(ImageError::Parse(_))));
    }

    #[test]
    fn test_save_and_load() {
        let program = assemble("helper:\nRET\nmain:\nJALI helper\nHLT").unwrap();
        let path = std::env::temp_dir().join(format!("vm16-image-{}.json", std::process::id()));

        save_image(&path, &program).unwrap();
        let loaded = load_image(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, program);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_image("/nonexistent/vm16/image.json"),
            Err(ImageError::Io(_))
        ));
    }
}
