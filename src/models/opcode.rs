use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

// NVMe admin 명령은 0x100 비트를 붙여 블록 요청 op와 구분한다
pub const ADMIN_FLAG: u16 = 0x100;

// 블록 요청 op + NVMe admin 명령 이름 테이블
const OPCODE_NAMES: &[(u16, &str)] = &[
    (0, "read"),
    (1, "write"),
    (2, "flush"),
    (3, "discard"),
    (4, "ZONE_REPORT"),
    (5, "SECURE_ERASE"),
    (6, "ZONE_RESET"),
    (7, "WRITE_SAME"),
    (9, "write_zeroes"),
    (32, "SCSI_IN"),
    (33, "SCSI_OUT"),
    (34, "DRV_IN"),
    (35, "DRV_OUT"),
    (0x100, "delete_sq"),
    (0x101, "create_sq"),
    (0x102, "get_log_page"),
    (0x104, "delete_cq"),
    (0x105, "create_cq"),
    (0x106, "identify"),
    (0x108, "abort_cmd"),
    (0x109, "set_features"),
    (0x10A, "get_features"),
    (0x10C, "async_event"),
    (0x10D, "ns_mgmt"),
    (0x110, "activate_fw"),
    (0x111, "download_fw"),
    (0x115, "ns_attach"),
    (0x118, "keep_alive"),
    (0x119, "directive_send"),
    (0x11A, "directive_recv"),
    (0x17C, "dbbuf"),
    (0x180, "format_nvm"),
    (0x181, "security_send"),
    (0x182, "security_recv"),
    (0x184, "sanitize_nvm"),
];

/// 이벤트의 op 코드. 알려진 코드는 이름으로, 나머지는 하위 바이트 hex로 표시한다.
///
/// 직렬화는 코드 숫자 그대로 한다 (admin 비트 보존).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Opcode(pub u16);

impl Opcode {
    pub const READ: Opcode = Opcode(0);
    pub const WRITE: Opcode = Opcode(1);

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn name(&self) -> Option<&'static str> {
        OPCODE_NAMES
            .iter()
            .find(|(code, _)| *code == self.0)
            .map(|(_, name)| *name)
    }

    pub fn is_admin(&self) -> bool {
        self.0 & ADMIN_FLAG != 0
    }

    pub fn is_write(&self) -> bool {
        *self == Opcode::WRITE
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:02x}", self.0 & 0xff),
        }
    }
}

impl FromStr for Opcode {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((code, _)) = OPCODE_NAMES.iter().find(|(_, name)| *name == s) {
            return Ok(Opcode(*code));
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u16::from_str_radix(hex, 16)
                .map(Opcode)
                .map_err(|_| DecodeError::new("opcode", format!("invalid hex opcode '{s}'")));
        }
        s.parse::<u16>()
            .map(Opcode)
            .map_err(|_| DecodeError::new("opcode", format!("unknown opcode '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_names() {
        assert_eq!(Opcode(1).to_string(), "write");
        assert_eq!(Opcode(0x106).to_string(), "identify");
        assert!(Opcode(0x106).is_admin());
        // 테이블에 없는 코드는 하위 바이트만 hex로
        assert_eq!(Opcode(0x1ee).to_string(), "0xee");
    }

    #[test]
    fn test_opcode_parse() {
        assert_eq!("write".parse::<Opcode>().unwrap(), Opcode::WRITE);
        assert_eq!("format_nvm".parse::<Opcode>().unwrap(), Opcode(0x180));
        assert_eq!("0x1f".parse::<Opcode>().unwrap(), Opcode(0x1f));
        assert_eq!("12".parse::<Opcode>().unwrap(), Opcode(12));
        assert!("bogus".parse::<Opcode>().is_err());
    }
}
