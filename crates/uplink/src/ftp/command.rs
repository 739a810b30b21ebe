//! Control-channel commands.  Only the subset the uploader speaks.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    User(&'a str),
    Pass(&'a str),
    TypeImage,
    Cwd(&'a str),
    Size(&'a str),
    Mlst(&'a str),
    Nlst(&'a str),
    Epsv,
    Pasv,
    Stor(&'a str),
    Rnfr(&'a str),
    Rnto(&'a str),
    Abor,
    Quit,
}

impl<'a> Command<'a> {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::User(_) => "USER",
            Self::Pass(_) => "PASS",
            Self::TypeImage => "TYPE",
            Self::Cwd(_) => "CWD",
            Self::Size(_) => "SIZE",
            Self::Mlst(_) => "MLST",
            Self::Nlst(_) => "NLST",
            Self::Epsv => "EPSV",
            Self::Pasv => "PASV",
            Self::Stor(_) => "STOR",
            Self::Rnfr(_) => "RNFR",
            Self::Rnto(_) => "RNTO",
            Self::Abor => "ABOR",
            Self::Quit => "QUIT",
        }
    }

    fn argument(&self) -> Option<&'a str> {
        match *self {
            Self::User(a)
            | Self::Pass(a)
            | Self::Cwd(a)
            | Self::Size(a)
            | Self::Mlst(a)
            | Self::Nlst(a)
            | Self::Stor(a)
            | Self::Rnfr(a)
            | Self::Rnto(a) => Some(a),
            Self::TypeImage => Some("I"),
            Self::Epsv | Self::Pasv | Self::Abor | Self::Quit => None,
        }
    }

    /// Wire form terminated by CRLF.  CR and LF inside the argument are
    /// dropped so a path can never smuggle a second command.
    pub fn to_line(&self) -> String {
        let verb = self.verb();
        let arg = self.argument().unwrap_or("");
        let mut line = String::with_capacity(verb.len() + arg.len() + 3);
        line.push_str(verb);
        if let Some(arg) = self.argument() {
            line.push(' ');
            line.extend(arg.chars().filter(|c| *c != '\r' && *c != '\n'));
        }
        line.push_str("\r\n");
        line
    }
}

/// Log form: the password is never printed.
impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.argument()) {
            (Self::Pass(_), _) => write!(f, "PASS ****"),
            (_, Some(arg)) => write!(f, "{} {arg}", self.verb()),
            (_, None) => f.write_str(self.verb()),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_verb_and_argument_with_crlf() {
        assert_eq!(Command::User("terminal").to_line(), "USER terminal\r\n");
        assert_eq!(Command::Stor("D_AA+1.txt").to_line(), "STOR D_AA+1.txt\r\n");
        assert_eq!(Command::TypeImage.to_line(), "TYPE I\r\n");
    }

    #[test]
    fn bare_commands_have_no_trailing_space() {
        assert_eq!(Command::Epsv.to_line(), "EPSV\r\n");
        assert_eq!(Command::Pasv.to_line(), "PASV\r\n");
        assert_eq!(Command::Abor.to_line(), "ABOR\r\n");
        assert_eq!(Command::Quit.to_line(), "QUIT\r\n");
    }

    #[test]
    fn line_breaks_in_arguments_are_stripped() {
        assert_eq!(
            Command::Cwd("/Dane\r\nDELE x").to_line(),
            "CWD /DaneDELE x\r\n"
        );
    }

    #[test]
    fn display_masks_password() {
        assert_eq!(Command::Pass("secret").to_string(), "PASS ****");
        assert_eq!(Command::Cwd("/Dane").to_string(), "CWD /Dane");
        assert_eq!(Command::Epsv.to_string(), "EPSV");
    }
}
