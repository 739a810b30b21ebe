//! Passive-mode reply parsing.  Only the port is taken from either reply;
//! the data connection always goes to the control host, which keeps NAT'd
//! servers that advertise private addresses reachable.

/// Port from a `229 Entering Extended Passive Mode (|||6446|)` line.
pub fn parse_epsv_port(line: &str) -> Option<u16> {
    let open = line.find('(')?;
    let close = open + line[open..].find(')')?;
    let inner = &line[open + 1..close];
    // (<d><d><d>port<d>) where <d> is normally '|'
    let delim = inner.chars().next()?;
    let fields: Vec<&str> = inner.split(delim).collect();
    if fields.len() != 5 {
        return None;
    }
    match fields[3].trim().parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// Port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` line.
/// Servers that leave out the parentheses are accepted too.
pub fn parse_pasv_port(line: &str) -> Option<u16> {
    let tuple = match (line.find('('), line.rfind(')')) {
        (Some(open), Some(close)) if open < close => &line[open + 1..close],
        _ => line
            .get(4..)?
            .split_whitespace()
            .find(|tok| tok.matches(',').count() == 5)?
            .trim_matches(|c: char| !c.is_ascii_digit()),
    };
    let octets = tuple
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .ok()?;
    if octets.len() != 6 {
        return None;
    }
    let port = u16::from(octets[4]) * 256 + u16::from(octets[5]);
    (port != 0).then_some(port)
}

// ===========================================================================
// Tests
// ===========================================================================
