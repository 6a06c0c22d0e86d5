use std::io::{self, Write};

use super::Sample;

/// Appends one phout line for `sample` to `buf`:
///
/// ```text
/// <ts.millis>\t<tag>\t<rtt>\t<connect>\t<send>\t<latency>\t<receive>\t<interval>\t<egress>\t<igress>\t<errno>\t<proto>\n
/// ```
///
/// Writing into a reused buffer keeps encoding allocation-free once the
/// buffer has grown to line size.
pub fn encode(sample: &Sample, buf: &mut Vec<u8>) -> io::Result<()> {
    let ts = sample.timestamp().timestamp_micros() as f64 / 1e6;
    write!(buf, "{ts:.3}\t{}", sample.tag())?;
    for value in sample.fields() {
        write!(buf, "\t{value}")?;
    }
    buf.push(b'\n');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{self, Field};
    use chrono::TimeZone;

    #[test]
    fn encodes_all_fields_in_wire_order() {
        let mut s = sample::acquire("REQUEST");
        s.timestamp = chrono::Utc.timestamp_micros(1_700_000_000_123_456).unwrap();
        s.add_tag("retry");
        s.set(Field::Rtt, 1500);
        s.set(Field::Connect, 10);
        s.set(Field::Send, 20);
        s.set(Field::Latency, 1300);
        s.set(Field::Receive, 170);
        s.set(Field::RequestBytes, 128);
        s.set(Field::ResponseBytes, 4096);
        s.set(Field::ProtoCode, 200);

        let mut buf = Vec::new();
        encode(&s, &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "1700000000.123\tREQUEST|retry\t1500\t10\t20\t1300\t170\t0\t128\t4096\t0\t200\n"
        );
        sample::release(s);
    }

    #[test]
    fn zero_fields_are_written() {
        let mut s = sample::acquire("t");
        s.timestamp = chrono::Utc.timestamp_micros(1_000_000).unwrap();
        let mut buf = Vec::new();
        encode(&s, &mut buf).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert_eq!(line, "1.000\tt\t0\t0\t0\t0\t0\t0\t0\t0\t0\t0\n");
        assert_eq!(line.trim_end().split('\t').count(), 12);
        sample::release(s);
    }

    #[test]
    fn reuses_buffer_capacity() {
        let s = sample::acquire("reuse");
        let mut buf = Vec::with_capacity(256);
        encode(&s, &mut buf).unwrap();
        let cap = buf.capacity();
        buf.clear();
        encode(&s, &mut buf).unwrap();
        assert_eq!(buf.capacity(), cap);
        sample::release(s);
    }
}
