use std::io::{self, BufRead, Write};

fn read_line<R: BufRead>(input: &mut R) -> io::Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "input closed before an answer was given",
        ));
    }
    Ok(line.trim().to_string())
}

/// Asks until a non-empty answer is given.
pub fn ask_text<R: BufRead, W: Write>(input: &mut R, output: &mut W, label: &str) -> io::Result<String> {
    loop {
        write!(output, "{label}: ")?;
        output.flush()?;
        let answer = read_line(input)?;
        if !answer.is_empty() {
            return Ok(answer);
        }
        writeln!(output, "Please enter a value.")?;
    }
}

/// Asks for a positive whole number. Blank selects `default`; anything
/// else that is not a number of at least 1 re-asks.
pub fn ask_count<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    label: &str,
    default: u32,
) -> io::Result<u32> {
    loop {
        write!(output, "{label} [{default}]: ")?;
        output.flush()?;
        let answer = read_line(input)?;
        if answer.is_empty() {
            return Ok(default);
        }
        match answer.parse::<u32>() {
            Ok(n) if n >= 1 => return Ok(n),
            _ => writeln!(output, "Please enter a whole number of at least 1.")?,
        }
    }
}
