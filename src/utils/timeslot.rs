/// HH:mm parsing/formatting for availability slots. Stored as minutes since
/// midnight; 24:00 is not a valid start but is accepted nowhere (end times
/// cap at 23:59 on input, 1440 never appears at the boundary).
pub fn parse_hhmm(value: &str) -> Option<i16> {
    let (h, m) = value.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let hours: i16 = h.parse().ok()?;
    let minutes: i16 = m.parse().ok()?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    Some(hours * 60 + minutes)
}

pub fn format_hhmm(minutes: i16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_times() {
        assert_eq!(parse_hhmm("00:00"), Some(0));
        assert_eq!(parse_hhmm("09:30"), Some(570));
        assert_eq!(parse_hhmm("23:59"), Some(1439));
    }

    #[test]
    fn rejects_malformed_times() {
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("9:30"), None);
        assert_eq!(parse_hhmm("09:60"), None);
        assert_eq!(parse_hhmm("0930"), None);
        assert_eq!(parse_hhmm(""), None);
    }

    #[test]
    fn formats_round_trip() {
        for m in [0, 570, 1439] {
            assert_eq!(parse_hhmm(&format_hhmm(m)), Some(m));
        }
    }
}
