//! Row to JSON conversion
//!
//! Values are decoded by column type. Types without a native JSON form are
//! rendered as text the way PostgreSQL prints them. A value that cannot be
//! decoded at all becomes `null` rather than failing the whole result.

use std::error::Error;
use std::fmt::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::types::JsonRow;

type DecodeResult<T> = Result<T, Box<dyn Error + Sync + Send>>;

/// Convert a row into a JSON object keyed by column name
pub fn row_to_json(row: &Row) -> JsonRow {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| (column.name().to_string(), column_value(row, idx, column.type_())))
        .collect()
}

fn column_value(row: &Row, idx: usize, ty: &Type) -> Value {
    match row.try_get::<_, PgValue>(idx) {
        Ok(PgValue(value)) => value,
        Err(e) => {
            tracing::debug!(column = idx, pg_type = %ty, "Undecodable value: {}", e);
            Value::Null
        }
    }
}

/// Any PostgreSQL value as JSON
///
/// Accepts every type. Arrays decode element by element.
struct PgValue(Value);

impl<'a> FromSql<'a> for PgValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        if let Kind::Array(_) = ty.kind() {
            let items = Vec::<PgValue>::from_sql(ty, raw)?;
            return Ok(PgValue(Value::Array(items.into_iter().map(|v| v.0).collect())));
        }
        decode_scalar(ty, raw).map(PgValue)
    }

    fn from_sql_null(_: &Type) -> DecodeResult<Self> {
        Ok(PgValue(Value::Null))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn decode<'a, T: FromSql<'a>>(ty: &Type, raw: &'a [u8]) -> DecodeResult<T> {
    T::from_sql(ty, raw)
}

fn decode_scalar(ty: &Type, raw: &[u8]) -> DecodeResult<Value> {
    let value = match *ty {
        Type::BOOL => Value::from(decode::<bool>(ty, raw)?),
        Type::INT2 => Value::from(decode::<i16>(ty, raw)?),
        Type::INT4 => Value::from(decode::<i32>(ty, raw)?),
        Type::INT8 => Value::from(decode::<i64>(ty, raw)?),
        Type::FLOAT4 => Value::from(decode::<f32>(ty, raw)? as f64),
        Type::FLOAT8 => Value::from(decode::<f64>(ty, raw)?),
        Type::NUMERIC => Value::String(numeric_to_string(raw)?),
        Type::UUID => Value::String(decode::<Uuid>(ty, raw)?.to_string()),
        Type::JSON | Type::JSONB => decode::<Value>(ty, raw)?,
        Type::TIMESTAMP => Value::String(decode::<NaiveDateTime>(ty, raw)?.to_string()),
        Type::TIMESTAMPTZ => Value::String(decode::<DateTime<Utc>>(ty, raw)?.to_rfc3339()),
        Type::DATE => Value::String(decode::<NaiveDate>(ty, raw)?.to_string()),
        Type::TIME => Value::String(decode::<NaiveTime>(ty, raw)?.to_string()),
        Type::TIMETZ => Value::String(timetz_to_string(raw)?),
        Type::INTERVAL => Value::String(interval_to_string(raw)?),
        Type::INET | Type::CIDR => Value::String(inet_to_string(raw)?),
        Type::MONEY => Value::String(money_to_string(decode::<i64>(&Type::INT8, raw)?)),
        Type::CHAR => Value::String(char_to_string(raw)),
        Type::BYTEA => Value::String(to_hex(raw)),
        Type::OID | Type::XID | Type::CID => Value::from(decode::<u32>(&Type::OID, raw)?),
        // regclass, regtype and friends travel as a bare oid
        _ if ty.name().starts_with("reg") && raw.len() == 4 => {
            Value::from(decode::<u32>(&Type::OID, raw)?)
        }
        _ if <String as FromSql>::accepts(ty) => Value::String(decode::<String>(ty, raw)?),
        // Enums, xml and most extension types are sent as their text form
        _ => match std::str::from_utf8(raw) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::String(to_hex(raw)),
        },
    };
    Ok(value)
}

/// Same text form PostgreSQL prints for bytea
fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn be_i32(raw: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

fn be_i64(raw: &[u8], at: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[at..at + 8]);
    i64::from_be_bytes(bytes)
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Decode the binary NUMERIC format: base-10000 digits plus weight and scale
fn numeric_to_string(raw: &[u8]) -> DecodeResult<String> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }
    let word = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);

    let ndigits = word(0) as usize;
    let weight = word(2) as i16 as i32;
    let sign = word(4);
    let dscale = word(6) as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".into()),
        NUMERIC_PINF => return Ok("Infinity".into()),
        NUMERIC_NINF => return Ok("-Infinity".into()),
        _ => {}
    }

    if raw.len() != 8 + ndigits * 2 {
        return Err("numeric digit count does not match length".into());
    }
    let digits: Vec<u16> = (0..ndigits).map(|i| word(8 + i * 2)).collect();
    let digit = |i: i32| -> u16 {
        if i < 0 {
            0
        } else {
            digits.get(i as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                let _ = write!(out, "{}", digit(i));
            } else {
                let _ = write!(out, "{:04}", digit(i));
            }
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit(i));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}

const MICROS_PER_SECOND: i64 = 1_000_000;

/// `HH:MM:SS` with a fractional part only when there is one
fn clock(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let micros = micros.unsigned_abs();
    let secs = micros / MICROS_PER_SECOND as u64;
    let frac = micros % MICROS_PER_SECOND as u64;

    let mut out = format!(
        "{}{:02}:{:02}:{:02}",
        sign,
        secs / 3600,
        secs / 60 % 60,
        secs % 60
    );
    if frac > 0 {
        let digits = format!("{:06}", frac);
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
    out
}

/// Binary TIMETZ: microseconds since midnight, then the zone in seconds west of UTC
fn timetz_to_string(raw: &[u8]) -> DecodeResult<String> {
    if raw.len() != 12 {
        return Err("timetz must be 12 bytes".into());
    }
    let micros = be_i64(raw, 0);
    let east = -be_i32(raw, 8);

    let sign = if east < 0 { '-' } else { '+' };
    let east = east.unsigned_abs();
    let mut out = format!("{}{}{:02}", clock(micros), sign, east / 3600);
    if east % 3600 != 0 {
        let _ = write!(out, ":{:02}", east / 60 % 60);
    }
    if east % 60 != 0 {
        let _ = write!(out, ":{:02}", east % 60);
    }
    Ok(out)
}

fn unit(out: &mut Vec<String>, value: i64, name: &str) {
    if value != 0 {
        let plural = if value == 1 { "" } else { "s" };
        out.push(format!("{} {}{}", value, name, plural));
    }
}

/// Binary INTERVAL: microseconds, days, months; printed in the default `postgres` style
fn interval_to_string(raw: &[u8]) -> DecodeResult<String> {
    if raw.len() != 16 {
        return Err("interval must be 16 bytes".into());
    }
    let micros = be_i64(raw, 0);
    let days = be_i32(raw, 8) as i64;
    let months = be_i32(raw, 12) as i64;

    let mut parts = Vec::new();
    unit(&mut parts, months / 12, "year");
    unit(&mut parts, months % 12, "mon");
    unit(&mut parts, days, "day");
    if micros != 0 || parts.is_empty() {
        parts.push(clock(micros));
    }
    Ok(parts.join(" "))
}

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

/// Binary INET/CIDR: family, prefix bits, cidr flag, address length, address
fn inet_to_string(raw: &[u8]) -> DecodeResult<String> {
    if raw.len() < 4 {
        return Err("inet value too short".into());
    }
    let (family, bits, is_cidr, len) = (raw[0], raw[1], raw[2] != 0, raw[3] as usize);
    let addr = &raw[4..];
    if addr.len() != len {
        return Err("inet address length mismatch".into());
    }

    let (ip, full) = match (family, addr.len()) {
        (PGSQL_AF_INET, 4) => (IpAddr::V4(Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3])), 32),
        (PGSQL_AF_INET6, 16) => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(addr);
            (IpAddr::V6(Ipv6Addr::from(octets)), 128)
        }
        _ => return Err(format!("unknown inet family {}", family).into()),
    };

    if is_cidr || bits != full {
        Ok(format!("{}/{}", ip, bits))
    } else {
        Ok(ip.to_string())
    }
}

/// Money is stored in cents; printed without the locale currency symbol
fn money_to_string(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, cents / 100, cents % 100)
}

/// The single-byte `"char"` type
fn char_to_string(raw: &[u8]) -> String {
    match raw.first() {
        Some(&b) if b != 0 => (b as char).to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    fn interval(micros: i64, days: i32, months: i32) -> Vec<u8> {
        let mut raw = micros.to_be_bytes().to_vec();
        raw.extend_from_slice(&days.to_be_bytes());
        raw.extend_from_slice(&months.to_be_bytes());
        raw
    }

    /// One-dimensional array in the binary wire layout
    fn int4_array(items: &[Option<i32>]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1i32.to_be_bytes()); // dimensions
        raw.extend_from_slice(&(items.iter().any(Option::is_none) as i32).to_be_bytes());
        raw.extend_from_slice(&Type::INT4.oid().to_be_bytes());
        raw.extend_from_slice(&(items.len() as i32).to_be_bytes());
        raw.extend_from_slice(&1i32.to_be_bytes()); // lower bound
        for item in items {
            match item {
                Some(v) => {
                    raw.extend_from_slice(&4i32.to_be_bytes());
                    raw.extend_from_slice(&v.to_be_bytes());
                }
                None => raw.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        raw
    }

    fn value(ty: &Type, raw: &[u8]) -> Value {
        PgValue::from_sql(ty, raw).unwrap().0
    }

    #[test]
    fn test_numeric_integer() {
        // 12345678 = 1234 * 10000 + 5678
        let raw = numeric(1, 0, 0, &[1234, 5678]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "12345678");
    }

    #[test]
    fn test_numeric_with_scale() {
        // -3.14
        let raw = numeric(0, NUMERIC_NEG, 2, &[3, 1400]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "-3.14");
    }

    #[test]
    fn test_numeric_small_fraction() {
        // 0.00001234
        let raw = numeric(-2, 0, 8, &[1234]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "0.00001234");
    }

    #[test]
    fn test_numeric_trailing_zero_groups() {
        // 20000 stored as a single digit with weight 1
        let raw = numeric(1, 0, 0, &[2]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "20000");
    }

    #[test]
    fn test_numeric_zero_and_specials() {
        assert_eq!(numeric_to_string(&numeric(0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(numeric_to_string(&numeric(0, 0, 2, &[])).unwrap(), "0.00");
        assert_eq!(numeric_to_string(&numeric(0, NUMERIC_NAN, 0, &[])).unwrap(), "NaN");
    }

    #[test]
    fn test_numeric_rejects_truncated_input() {
        assert!(numeric_to_string(&[0, 1]).is_err());
        assert!(numeric_to_string(&numeric(0, 0, 0, &[1])[..9]).is_err());
    }

    #[test]
    fn test_uuid() {
        let raw: Vec<u8> = (0u8..16).collect();
        assert_eq!(
            value(&Type::UUID, &raw),
            json!("00010203-0405-0607-0809-0a0b0c0d0e0f")
        );
        assert!(PgValue::from_sql(&Type::UUID, &raw[..4]).is_err());
    }

    #[test]
    fn test_hex() {
        assert_eq!(to_hex(&[0xde, 0xad, 0x01]), "\\xdead01");
    }

    #[test]
    fn test_int_array_keeps_nulls() {
        let raw = int4_array(&[Some(1), None, Some(3)]);
        assert_eq!(value(&Type::INT4_ARRAY, &raw), json!([1, null, 3]));
    }

    #[test]
    fn test_empty_array() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&0i32.to_be_bytes());
        raw.extend_from_slice(&0i32.to_be_bytes());
        raw.extend_from_slice(&Type::INT4.oid().to_be_bytes());
        assert_eq!(value(&Type::INT4_ARRAY, &raw), json!([]));
    }

    #[test]
    fn test_interval() {
        assert_eq!(interval_to_string(&interval(0, 1, 0)).unwrap(), "1 day");
        assert_eq!(
            interval_to_string(&interval(3_723_500_000, 2, 14)).unwrap(),
            "1 year 2 mons 2 days 01:02:03.5"
        );
        assert_eq!(interval_to_string(&interval(0, 0, 0)).unwrap(), "00:00:00");
        assert_eq!(
            interval_to_string(&interval(-60_000_000, 0, -1)).unwrap(),
            "-1 mons -00:01:00"
        );
    }

    #[test]
    fn test_timetz() {
        let micros = (14 * 3600 + 3 * 60) * MICROS_PER_SECOND;
        let mut raw = micros.to_be_bytes().to_vec();
        raw.extend_from_slice(&(-19_800i32).to_be_bytes());
        assert_eq!(timetz_to_string(&raw).unwrap(), "14:03:00+05:30");

        let mut utc = 0i64.to_be_bytes().to_vec();
        utc.extend_from_slice(&0i32.to_be_bytes());
        assert_eq!(timetz_to_string(&utc).unwrap(), "00:00:00+00");
    }

    #[test]
    fn test_inet_and_cidr() {
        let host = [PGSQL_AF_INET, 32, 0, 4, 10, 0, 0, 1];
        assert_eq!(value(&Type::INET, &host), json!("10.0.0.1"));

        let net = [PGSQL_AF_INET, 24, 1, 4, 192, 168, 1, 0];
        assert_eq!(value(&Type::CIDR, &net), json!("192.168.1.0/24"));

        let mut v6 = vec![PGSQL_AF_INET6, 64, 0, 16];
        v6.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        assert_eq!(value(&Type::INET, &v6), json!("::1/64"));
    }

    #[test]
    fn test_char_money_and_regclass() {
        assert_eq!(value(&Type::CHAR, b"a"), json!("a"));
        assert_eq!(value(&Type::MONEY, &(-1234i64).to_be_bytes()), json!("-12.34"));
        assert_eq!(value(&Type::REGCLASS, &16384u32.to_be_bytes()), json!(16384));
    }

    #[test]
    fn test_unknown_types_fall_back_to_text_or_hex() {
        assert_eq!(value(&Type::XML, b"<a/>"), json!("<a/>"));
        assert_eq!(value(&Type::POINT, &[0xff, 0xfe]), json!("\\xfffe"));
    }
}
