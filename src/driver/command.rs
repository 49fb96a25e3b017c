//! Text encoding of driver requests and responses.
//!
//! A message is a command name followed by space separated arguments.
//! Integers are written plainly, floats with six fixed decimals, and a
//! pose as `x y z qw qx qy qz`.

use std::fmt::Write as _;
use std::str::{FromStr, SplitWhitespace};

use super::error::DriverError;
use crate::geometry::Pose;

pub trait CommandArg {
    fn write_arg(&self, buf: &mut String);
}

impl CommandArg for i32 {
    fn write_arg(&self, buf: &mut String) {
        let _ = write!(buf, "{}", self);
    }
}

impl CommandArg for usize {
    fn write_arg(&self, buf: &mut String) {
        let _ = write!(buf, "{}", self);
    }
}

impl CommandArg for f64 {
    fn write_arg(&self, buf: &mut String) {
        let _ = write!(buf, "{:.6}", self);
    }
}

impl CommandArg for &str {
    fn write_arg(&self, buf: &mut String) {
        buf.push_str(self);
    }
}

impl CommandArg for String {
    fn write_arg(&self, buf: &mut String) {
        buf.push_str(self);
    }
}

impl CommandArg for Pose {
    fn write_arg(&self, buf: &mut String) {
        let p = &self.position;
        let [w, x, y, z] = self.quaternion_wxyz();
        let _ = write!(
            buf,
            "{:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6}",
            p.x, p.y, p.z, w, x, y, z
        );
    }
}

/// Builder for one request line.
#[derive(Debug, Clone)]
pub struct Command {
    buf: String,
}

impl Command {
    pub fn new(name: &str) -> Self {
        Self {
            buf: name.to_string(),
        }
    }

    pub fn arg<A: CommandArg>(mut self, arg: A) -> Self {
        self.buf.push(' ');
        arg.write_arg(&mut self.buf);
        self
    }

    pub fn build(self) -> String {
        self.buf
    }
}

/// Remaining arguments of a message whose name has been verified.
pub struct Args<'a> {
    raw: &'a str,
    tokens: SplitWhitespace<'a>,
}

/// Check that the first token of `raw` is `expected` and hand back the
/// rest for parsing.
pub fn verify_and_parse<'a>(raw: &'a str, expected: &'static str) -> Result<Args<'a>, DriverError> {
    let mut tokens = raw.split_whitespace();
    match tokens.next() {
        None => Err(DriverError::NoResponse),
        Some(name) if name != expected => Err(DriverError::UnexpectedResponse {
            expected,
            response: raw.to_string(),
        }),
        Some(_) => Ok(Args { raw, tokens }),
    }
}

impl<'a> Args<'a> {
    pub fn next<T: FromStr>(&mut self) -> Result<T, DriverError> {
        self.tokens
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| self.malformed())
    }

    pub fn next_str(&mut self) -> Result<&'a str, DriverError> {
        let raw = self.raw;
        self.tokens.next().ok_or_else(|| DriverError::Malformed {
            response: raw.to_string(),
        })
    }

    pub fn next_pose(&mut self) -> Result<Pose, DriverError> {
        let x = self.next::<f64>()?;
        let y = self.next::<f64>()?;
        let z = self.next::<f64>()?;
        let qw = self.next::<f64>()?;
        let qx = self.next::<f64>()?;
        let qy = self.next::<f64>()?;
        let qz = self.next::<f64>()?;
        Ok(Pose::from_components([x, y, z], qw, qx, qy, qz))
    }

    fn malformed(&self) -> DriverError {
        DriverError::Malformed {
            response: self.raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_build_no_args() {
        assert_eq!(Command::new("numtrackers").build(), "numtrackers");
    }

    #[test]
    fn test_build_number_formatting() {
        assert_eq!(Command::new("foo").arg(10).build(), "foo 10");
        assert_eq!(Command::new("foo").arg(1.1).build(), "foo 1.100000");
        assert_eq!(Command::new("foo").arg(10.1234559).build(), "foo 10.123456");
        assert_eq!(
            Command::new("foo").arg("bar").arg("baz").arg(10).build(),
            "foo bar baz 10"
        );
    }

    #[test]
    fn test_build_pose() {
        let pose = Pose::from_components([0.1, 0.2, 0.3], 1.0, 0.0, 0.0, 0.0);
        assert_eq!(
            Command::new("foo").arg(pose).build(),
            "foo 0.100000 0.200000 0.300000 1.000000 0.000000 0.000000 0.000000"
        );
    }

    #[test]
    fn test_build_updatepose() {
        let pose = Pose::from_components([1.0, 2.0, 3.0], 1.0, 0.0, 0.0, 0.0);
        let cmd = Command::new("updatepose")
            .arg(2)
            .arg(pose)
            .arg(-0.05)
            .arg(0.5)
            .build();
        assert_eq!(
            cmd,
            "updatepose 2 1.000000 2.000000 3.000000 1.000000 0.000000 0.000000 0.000000 -0.050000 0.500000"
        );

        // the debug driver reads requests with the same parser
        let mut args = verify_and_parse(&cmd, "updatepose").unwrap();
        assert_eq!(args.next::<i32>().unwrap(), 2);
        let parsed = args.next_pose().unwrap();
        assert!(approx_eq(parsed.position.y, 2.0));
        assert!(approx_eq(args.next::<f64>().unwrap(), -0.05));
        assert!(approx_eq(args.next::<f64>().unwrap(), 0.5));
    }

    #[test]
    fn test_verify_matching_name() {
        assert!(verify_and_parse("updated", "updated").is_ok());
        assert!(verify_and_parse("  updated\n", "updated").is_ok());
    }

    #[test]
    fn test_verify_mismatch_carries_raw() {
        match verify_and_parse("idinvalid", "updated") {
            Err(DriverError::UnexpectedResponse { expected, response }) => {
                assert_eq!(expected, "updated");
                assert_eq!(response, "idinvalid");
            }
            _ => panic!("expected UnexpectedResponse"),
        }
    }

    #[test]
    fn test_verify_empty() {
        assert!(matches!(
            verify_and_parse("", "updated"),
            Err(DriverError::NoResponse)
        ));
        assert!(matches!(
            verify_and_parse("   ", "updated"),
            Err(DriverError::NoResponse)
        ));
    }

    #[test]
    fn test_parse_int_arg() {
        let mut args = verify_and_parse("foo 12", "foo").unwrap();
        assert_eq!(args.next::<i32>().unwrap(), 12);
    }

    #[test]
    fn test_parse_missing_or_bad_arg() {
        let mut args = verify_and_parse("numtrackers", "numtrackers").unwrap();
        assert!(matches!(
            args.next::<i64>(),
            Err(DriverError::Malformed { .. })
        ));

        let mut args = verify_and_parse("numtrackers abc 0.6.0", "numtrackers").unwrap();
        assert!(matches!(
            args.next::<i64>(),
            Err(DriverError::Malformed { .. })
        ));
    }

    #[test]
    fn test_parse_trackerpose() {
        let raw = "trackerpose 1 0.5 1.0 -2.0 0.0 0.0 1.0 0.0 0";
        let mut args = verify_and_parse(raw, "trackerpose").unwrap();
        assert_eq!(args.next::<i64>().unwrap(), 1);
        let pose = args.next_pose().unwrap();
        assert_eq!(pose.position, Vector3::new(0.5, 1.0, -2.0));
        assert_eq!(pose.quaternion_wxyz(), [0.0, 0.0, 1.0, 0.0]);
        assert_eq!(args.next::<i32>().unwrap(), 0);
    }

    #[test]
    fn test_parse_next_str() {
        let mut args = verify_and_parse("numtrackers 3 0.6.0", "numtrackers").unwrap();
        assert_eq!(args.next::<i64>().unwrap(), 3);
        assert_eq!(args.next_str().unwrap(), "0.6.0");
        assert!(args.next_str().is_err());
    }
}
