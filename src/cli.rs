//! CLI utilities for chwire.
//!
//! The utilities present in this module are used by the `chwire_cli` REPL.
use std::io::{self, BufRead, Write};

use crate::block::Block;

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Exit command `.exit`, also produced at end of input
    Exit,
    /// Round trip to the server `.ping`
    Ping,
    /// SQL sent to the server as is
    Statement(String),
}

/// Prompt user for a command.
///
/// Fails on an unrecognized dot command or when the input cannot be read.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, String>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ").map_err(|e| format!("failed to write prompt: {e}"))?;
    writer
        .flush()
        .map_err(|e| format!("failed to write prompt: {e}"))?;

    let read = reader
        .read_line(&mut s)
        .map_err(|e| format!("failed to read input: {e}"))?;
    if read == 0 {
        return Ok(Command::Exit);
    }

    match s.trim() {
        ".exit" | ".quit" => Ok(Command::Exit),
        ".ping" => Ok(Command::Ping),
        s if !s.starts_with('.') => Ok(Command::Statement(s.trim_end_matches(';').to_string())),
        s => Err(format!("unrecognized command '{}'", s)),
    }
}

/// Writes the rows of a block as tab-separated lines.
pub fn render_block<W: Write>(block: &Block, mut writer: W) -> io::Result<()> {
    for row in 0..block.rows() {
        let cells: Vec<String> = block
            .columns()
            .iter()
            .map(|column| column.get(row).map(|v| v.to_string()).unwrap_or_default())
            .collect();
        writeln!(writer, "{}", cells.join("\t"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{block::Column, types::Value};

    use super::*;

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_handles_statements() {
        let input = b"SELECT 1;\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert_eq!(Command::Statement(String::from("SELECT 1")), res);

        let res = prompt(&b".ping\n"[..], &mut output).unwrap();
        assert_eq!(Command::Ping, res);
    }

    #[test]
    fn end_of_input_exits() {
        let res = prompt(&b""[..], Vec::new()).unwrap();
        assert_eq!(Command::Exit, res);
    }

    #[test]
    #[should_panic(expected = "unrecognized command '.something_wrong'")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();
    }

    #[test]
    fn render_rows_tab_separated() {
        let block = Block::new(vec![
            Column::from_values("n", "UInt8", [1_u8, 2]).unwrap(),
            Column::from_values("s", "Nullable(String)", [Some("a"), None]).unwrap(),
        ])
        .unwrap();
        let mut output = Vec::new();
        render_block(&block, &mut output).unwrap();

        let expected = format!("1\ta\n2\t{}\n", Value::Null);
        assert_eq!(String::from_utf8(output).unwrap(), expected);
    }
}
