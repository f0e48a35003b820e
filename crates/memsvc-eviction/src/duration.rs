use chrono::Duration;

/// Parses the practical subset of ISO-8601 durations this service accepts as
/// a retention period: `P[n]Y[n]M[n]D` optionally followed by
/// `T[n]H[n]M[n]S`, or the week form `P[n]W`. Years are treated as 365 days
/// and months as 30 days — a retention cutoff doesn't need calendar
/// precision, and a single call site doesn't earn a calendar-aware duration
/// dependency.
pub fn parse_retention_period(input: &str) -> std::result::Result<Duration, String> {
    let invalid = || format!("invalid ISO-8601 duration: {input}");
    let s = input.trim();
    let rest = s.strip_prefix('P').ok_or_else(invalid)?;
    if rest.is_empty() {
        return Err(invalid());
    }

    if let Some(weeks) = rest.strip_suffix('W') {
        let n: i64 = weeks.parse().map_err(|_| invalid())?;
        return Ok(Duration::weeks(n));
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    let mut total = Duration::zero();
    let mut matched_any = false;

    let mut num = String::new();
    for ch in date_part.chars() {
        match ch {
            '0'..='9' => num.push(ch),
            'Y' => {
                total += Duration::days(take_component(&mut num, input)? * 365);
                matched_any = true;
            }
            'M' => {
                total += Duration::days(take_component(&mut num, input)? * 30);
                matched_any = true;
            }
            'D' => {
                total += Duration::days(take_component(&mut num, input)?);
                matched_any = true;
            }
            _ => return Err(invalid()),
        }
    }
    if !num.is_empty() {
        return Err(invalid());
    }

    if let Some(time_part) = time_part {
        for ch in time_part.chars() {
            match ch {
                '0'..='9' => num.push(ch),
                'H' => {
                    total += Duration::hours(take_component(&mut num, input)?);
                    matched_any = true;
                }
                'M' => {
                    total += Duration::minutes(take_component(&mut num, input)?);
                    matched_any = true;
                }
                'S' => {
                    total += Duration::seconds(take_component(&mut num, input)?);
                    matched_any = true;
                }
                _ => return Err(invalid()),
            }
        }
        if !num.is_empty() {
            return Err(invalid());
        }
    }

    if !matched_any {
        return Err(invalid());
    }
    Ok(total)
}

fn take_component(num: &mut String, original: &str) -> std::result::Result<i64, String> {
    if num.is_empty() {
        return Err(format!("invalid ISO-8601 duration: {original}"));
    }
    let parsed = num.parse().map_err(|_| format!("invalid ISO-8601 duration: {original}"))?;
    num.clear();
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_days() {
        let d = parse_retention_period("P90D").unwrap();
        assert_eq!(d, Duration::days(90));
    }

    #[test]
    fn parses_weeks() {
        let d = parse_retention_period("P2W").unwrap();
        assert_eq!(d, Duration::days(14));
    }

    #[test]
    fn parses_combined_date_and_time() {
        let d = parse_retention_period("P1DT12H").unwrap();
        assert_eq!(d, Duration::days(1) + Duration::hours(12));
    }

    #[test]
    fn parses_time_only() {
        let d = parse_retention_period("PT30M").unwrap();
        assert_eq!(d, Duration::minutes(30));
    }

    #[test]
    fn rejects_missing_p_prefix() {
        assert!(parse_retention_period("90D").is_err());
    }

    #[test]
    fn rejects_empty_duration() {
        assert!(parse_retention_period("P").is_err());
        assert!(parse_retention_period("PT").is_err());
    }

    #[test]
    fn rejects_garbage_designator() {
        assert!(parse_retention_period("P90X").is_err());
    }
}
