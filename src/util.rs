use std::fmt::Display;
use std::io::{self, Write};
use std::process::exit;


// Short name used to prefix fatal diagnostics.
pub const PROGRAM_NAME: &str = "reckon";


// Report an unrecoverable error on stderr and terminate. Registration
// and resolution both happen before any record is processed, so there
// is nothing to unwind.
pub fn fatal(msg: impl Display) -> ! {
    eprintln!("{}: {}", PROGRAM_NAME, msg);
    exit(1);
}


// Write names space-separated, wrapping before column 80. Each output
// line begins with the leader string.
pub fn write_wrapped_names<'a, W, I>(w: &mut W, leader: &str, names: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a str>,
{
    let mut linelen = leader.len();
    let mut at_line_start = true;
    for name in names {
        linelen += 1 + name.len();
        if linelen > 80 {
            writeln!(w)?;
            linelen = 1 + leader.len() + name.len();
            at_line_start = true;
        }
        if at_line_start {
            write!(w, "{}", leader)?;
            at_line_start = false;
        }
        write!(w, " {}", name)?;
    }
    writeln!(w)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_stays_under_80_columns() {
        let names: Vec<String> = (0..40).map(|i| format!("func{:02}", i)).collect();
        let mut out = Vec::new();
        write_wrapped_names(&mut out, " ", names.iter().map(|s| s.as_str())).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().count() > 1);
        for line in text.lines() {
            assert!(line.len() <= 80, "line too long: {:?}", line);
            assert!(line.starts_with(' '));
        }
    }

    #[test]
    fn test_wrap_single_line() {
        let mut out = Vec::new();
        write_wrapped_names(&mut out, ">", vec!["a", "b"]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "> a b\n");
    }
}
