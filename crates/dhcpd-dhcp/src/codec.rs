use std::net::Ipv4Addr;

use dhcpd_core::types::RelayAgentInfo;

/// DHCP message types (RFC 2131 §3, option 53 values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl DhcpMessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }
}

/// DHCP option codes (RFC 2132 plus the relay-agent and routing RFCs in scope).
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS_SERVER: u8 = 6;
pub const OPT_HOSTNAME: u8 = 12;
pub const OPT_DOMAIN_NAME: u8 = 15;
pub const OPT_NTP_SERVERS: u8 = 42;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MESSAGE_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_PARAMETER_LIST: u8 = 55;
pub const OPT_RENEWAL_TIME: u8 = 58; // T1
pub const OPT_REBINDING_TIME: u8 = 59; // T2
pub const OPT_MESSAGE: u8 = 56;
pub const OPT_VENDOR_CLASS_ID: u8 = 60;
pub const OPT_CLIENT_ID: u8 = 61;
pub const OPT_TFTP_SERVER: u8 = 66;
pub const OPT_BOOTFILE: u8 = 67;
pub const OPT_USER_CLASS: u8 = 77;
pub const OPT_SUBNET_SELECTION: u8 = 118; // RFC 3011
pub const OPT_CLASSLESS_ROUTES: u8 = 121; // RFC 3442
pub const OPT_RELAY_AGENT_INFO: u8 = 82; // RFC 3046
pub const OPT_END: u8 = 255;

/// RFC 3046 §3.1 relay agent sub-option codes.
pub const SUBOPT_CIRCUIT_ID: u8 = 1;
pub const SUBOPT_REMOTE_ID: u8 = 2;
pub const SUBOPT_LINK_SELECTION: u8 = 5; // RFC 3527

const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

#[derive(Debug, Clone)]
pub struct DhcpPacket {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: Vec<DhcpOption>,
}

#[derive(Debug, Clone)]
pub struct DhcpOption {
    pub code: u8,
    pub data: Vec<u8>,
}

impl DhcpPacket {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 240 {
            return None;
        }

        let op = data[0];
        let htype = data[1];
        let hlen = data[2];
        let hops = data[3];
        let xid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let secs = u16::from_be_bytes([data[8], data[9]]);
        let flags = u16::from_be_bytes([data[10], data[11]]);
        let ciaddr = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
        let yiaddr = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
        let siaddr = Ipv4Addr::new(data[20], data[21], data[22], data[23]);
        let giaddr = Ipv4Addr::new(data[24], data[25], data[26], data[27]);

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);

        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[44..108]);

        let mut file = [0u8; 128];
        file.copy_from_slice(&data[108..236]);

        if data[236..240] != MAGIC_COOKIE {
            return None;
        }

        let options = parse_options(&data[240..])?;

        Some(DhcpPacket {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 240];

        buf[0] = self.op;
        buf[1] = self.htype;
        buf[2] = self.hlen;
        buf[3] = self.hops;
        buf[4..8].copy_from_slice(&self.xid.to_be_bytes());
        buf[8..10].copy_from_slice(&self.secs.to_be_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ciaddr.octets());
        buf[16..20].copy_from_slice(&self.yiaddr.octets());
        buf[20..24].copy_from_slice(&self.siaddr.octets());
        buf[24..28].copy_from_slice(&self.giaddr.octets());
        buf[28..44].copy_from_slice(&self.chaddr);
        buf[44..108].copy_from_slice(&self.sname);
        buf[108..236].copy_from_slice(&self.file);

        buf[236..240].copy_from_slice(&MAGIC_COOKIE);

        for opt in &self.options {
            buf.push(opt.code);
            if opt.code != OPT_END {
                buf.push(opt.data.len() as u8);
                buf.extend_from_slice(&opt.data);
            }
        }

        if self.options.last().map(|o| o.code) != Some(OPT_END) {
            buf.push(OPT_END);
        }

        while buf.len() < 300 {
            buf.push(0);
        }

        buf
    }

    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.get_option(OPT_MESSAGE_TYPE)
            .and_then(|data| data.first().copied())
            .and_then(DhcpMessageType::from_u8)
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.get_option(OPT_REQUESTED_IP).and_then(|data| {
            if data.len() == 4 {
                Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
            } else {
                None
            }
        })
    }

    pub fn server_id(&self) -> Option<Ipv4Addr> {
        self.get_option(OPT_SERVER_ID).and_then(|data| {
            if data.len() == 4 {
                Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
            } else {
                None
            }
        })
    }

    pub fn hostname(&self) -> Option<String> {
        self.get_option(OPT_HOSTNAME)
            .and_then(|data| String::from_utf8(data.to_vec()).ok())
    }

    pub fn vendor_class(&self) -> Option<String> {
        self.get_option(OPT_VENDOR_CLASS_ID)
            .and_then(|data| String::from_utf8(data.to_vec()).ok())
    }

    pub fn user_class(&self) -> Option<String> {
        self.get_option(OPT_USER_CLASS)
            .and_then(|data| String::from_utf8(data.to_vec()).ok())
    }

    /// RFC 6842: client identifier (option 61), falls back to the MAC
    /// address the wire format already carries if absent.
    pub fn client_id(&self) -> Option<String> {
        self.get_option(OPT_CLIENT_ID)
            .map(|data| data.iter().map(|b| format!("{b:02x}")).collect::<String>())
    }

    /// RFC 3011 subnet selection, used by relays forwarding off-link requests.
    pub fn subnet_selection(&self) -> Option<Ipv4Addr> {
        self.get_option(OPT_SUBNET_SELECTION).and_then(|data| {
            if data.len() == 4 {
                Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
            } else {
                None
            }
        })
    }

    /// RFC 3046 relay agent information, decoded from the sub-option TLV
    /// stream. The raw bytes are preserved so they can be echoed verbatim.
    pub fn relay_agent_info(&self) -> Option<RelayAgentInfo> {
        let raw = self.get_option(OPT_RELAY_AGENT_INFO)?.to_vec();
        let mut info = RelayAgentInfo {
            raw: raw.clone(),
            ..Default::default()
        };

        let mut i = 0;
        while i + 2 <= raw.len() {
            let subcode = raw[i];
            let sublen = raw[i + 1] as usize;
            i += 2;
            if i + sublen > raw.len() {
                break;
            }
            let subdata = &raw[i..i + sublen];
            match subcode {
                SUBOPT_CIRCUIT_ID => {
                    info.circuit_id = Some(String::from_utf8_lossy(subdata).into_owned());
                }
                SUBOPT_REMOTE_ID => {
                    info.remote_id = Some(String::from_utf8_lossy(subdata).into_owned());
                }
                SUBOPT_LINK_SELECTION if sublen == 4 => {
                    info.link_selection =
                        Some(Ipv4Addr::new(subdata[0], subdata[1], subdata[2], subdata[3]));
                }
                _ => {}
            }
            i += sublen;
        }

        Some(info)
    }

    pub fn get_option(&self, code: u8) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|o| o.code == code)
            .map(|o| o.data.as_slice())
    }

    pub fn mac_address(&self) -> String {
        let len = self.hlen as usize;
        let mac = &self.chaddr[..len.min(6)];
        mac.iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }
}

fn parse_options(data: &[u8]) -> Option<Vec<DhcpOption>> {
    let mut options = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let code = data[i];
        i += 1;

        if code == OPT_END {
            options.push(DhcpOption {
                code: OPT_END,
                data: Vec::new(),
            });
            break;
        }

        if code == 0 {
            continue;
        }

        if i >= data.len() {
            break;
        }

        let len = data[i] as usize;
        i += 1;

        if i + len > data.len() {
            break;
        }

        options.push(DhcpOption {
            code,
            data: data[i..i + len].to_vec(),
        });
        i += len;
    }

    Some(options)
}

pub fn ip_option(code: u8, addr: Ipv4Addr) -> DhcpOption {
    DhcpOption {
        code,
        data: addr.octets().to_vec(),
    }
}

pub fn u32_option(code: u8, val: u32) -> DhcpOption {
    DhcpOption {
        code,
        data: val.to_be_bytes().to_vec(),
    }
}

pub fn ip_list_option(code: u8, addrs: &[Ipv4Addr]) -> DhcpOption {
    let mut data = Vec::new();
    for addr in addrs {
        data.extend_from_slice(&addr.octets());
    }
    DhcpOption { code, data }
}

pub fn string_option(code: u8, s: &str) -> DhcpOption {
    DhcpOption {
        code,
        data: s.as_bytes().to_vec(),
    }
}

pub fn message_type_option(msg_type: DhcpMessageType) -> DhcpOption {
    DhcpOption {
        code: OPT_MESSAGE_TYPE,
        data: vec![msg_type as u8],
    }
}

/// A single RFC 3442 classless static route entry.
pub struct ClasslessRoute {
    pub destination: ipnet::Ipv4Net,
    pub gateway: Ipv4Addr,
}

/// Encode classless static routes (option 121). Each entry is a
/// variable-length significant-octets prefix followed by the 4-byte
/// gateway, per RFC 3442 §3.
pub fn classless_routes_option(routes: &[ClasslessRoute]) -> DhcpOption {
    let mut data = Vec::new();
    for route in routes {
        let prefix_len = route.destination.prefix_len();
        let significant_octets = (prefix_len as usize).div_ceil(8);
        data.push(prefix_len);
        let octets = route.destination.network().octets();
        data.extend_from_slice(&octets[..significant_octets]);
        data.extend_from_slice(&route.gateway.octets());
    }
    DhcpOption {
        code: OPT_CLASSLESS_ROUTES,
        data,
    }
}

/// Encode an RFC 3046 relay agent information option that echoes the
/// circuit-id and remote-id sub-options observed on the request verbatim.
pub fn relay_agent_info_echo(info: &RelayAgentInfo) -> DhcpOption {
    DhcpOption {
        code: OPT_RELAY_AGENT_INFO,
        data: info.raw.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_packet(options: Vec<DhcpOption>) -> DhcpPacket {
        DhcpPacket {
            op: 1,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0x12345678,
            secs: 0,
            flags: 0x8000,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: {
                let mut c = [0u8; 16];
                c[0..6].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
                c
            },
            sname: [0u8; 64],
            file: [0u8; 128],
            options,
        }
    }

    #[test]
    fn test_roundtrip() {
        let packet = base_packet(vec![
            message_type_option(DhcpMessageType::Discover),
            DhcpOption {
                code: OPT_END,
                data: Vec::new(),
            },
        ]);

        let bytes = packet.to_bytes();
        let parsed = DhcpPacket::parse(&bytes).unwrap();

        assert_eq!(parsed.op, 1);
        assert_eq!(parsed.xid, 0x12345678);
        assert_eq!(parsed.flags, 0x8000);
        assert_eq!(parsed.message_type(), Some(DhcpMessageType::Discover));
        assert_eq!(parsed.mac_address(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_relay_agent_info_roundtrip() {
        let mut raw = Vec::new();
        raw.push(SUBOPT_CIRCUIT_ID);
        raw.push(3);
        raw.extend_from_slice(b"eth0");
        raw.truncate(2 + 3); // "eth" only fits the declared length
        raw.push(SUBOPT_REMOTE_ID);
        raw.push(4);
        raw.extend_from_slice(b"host");

        let packet = base_packet(vec![
            message_type_option(DhcpMessageType::Discover),
            DhcpOption {
                code: OPT_RELAY_AGENT_INFO,
                data: raw.clone(),
            },
            DhcpOption {
                code: OPT_END,
                data: Vec::new(),
            },
        ]);

        let bytes = packet.to_bytes();
        let parsed = DhcpPacket::parse(&bytes).unwrap();
        let info = parsed.relay_agent_info().unwrap();

        assert_eq!(info.circuit_id.as_deref(), Some("eth"));
        assert_eq!(info.remote_id.as_deref(), Some("host"));
        assert_eq!(info.raw, raw);
    }

    #[test]
    fn test_classless_routes_encoding() {
        let routes = vec![ClasslessRoute {
            destination: "10.1.0.0/16".parse().unwrap(),
            gateway: "192.168.1.1".parse().unwrap(),
        }];
        let opt = classless_routes_option(&routes);
        // /16 -> 2 significant octets + prefix byte + 4 byte gateway
        assert_eq!(opt.data.len(), 1 + 2 + 4);
        assert_eq!(opt.data[0], 16);
        assert_eq!(&opt.data[1..3], &[10, 1]);
        assert_eq!(&opt.data[3..7], &[192, 168, 1, 1]);
    }

    #[test]
    fn test_client_id_and_subnet_selection() {
        let packet = base_packet(vec![
            DhcpOption {
                code: OPT_CLIENT_ID,
                data: vec![0x01, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
            },
            ip_option(OPT_SUBNET_SELECTION, "10.0.0.0".parse().unwrap()),
            DhcpOption {
                code: OPT_END,
                data: Vec::new(),
            },
        ]);

        let bytes = packet.to_bytes();
        let parsed = DhcpPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.client_id().unwrap(), "01aabbccddeeff");
        assert_eq!(
            parsed.subnet_selection(),
            Some("10.0.0.0".parse().unwrap())
        );
    }
}
