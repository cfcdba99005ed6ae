//! SCSI INQUIRY over the version 3 SCSI generic (sg) driver.
//!
//! [`inquire`] runs the standard INQUIRY followed by the vital product data
//! pages needed to build a persistent identity: the unit serial number
//! (page 0x80) and the device identification page (0x83), which yields the
//! WWN. The sequencing is written against [`Transport`] so it can run on
//! canned replies; [`SgDevice`] is the kernel implementation.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use nix::libc;
use serde::Serialize;
use tracing::debug;

/// `SG_IO` request code.
pub const SG_IO: u64 = 0x2285;
/// `SG_GET_VERSION_NUM` request code.
pub const SG_GET_VERSION_NUM: u64 = 0x2282;
/// Oldest driver version with the v3 interface.
pub const MIN_SG_VERSION: i32 = 30000;

const INTERFACE_ID: i32 = b'S' as i32;
const DXFER_FROM_DEV: i32 = -3;
const SENSE_BUF_LEN: usize = 32;
/// Timeout of a single command, in milliseconds.
pub const TIMEOUT_MS: u32 = 5000;

const INQUIRY_CMD: u8 = 0x12;
/// Allocation length of every INQUIRY.
pub const INQUIRY_BUF_LEN: usize = 252;

const PAGE_SUPPORTED: u8 = 0x00;
const PAGE_SERIAL: u8 = 0x80;
const PAGE_IDENTIFICATION: u8 = 0x83;

const VENDOR_LEN: usize = 8;
const MODEL_LEN: usize = 16;
const MAX_SERIAL_LEN: usize = 256;
const CODE_SET_ASCII: u8 = 2;

/// Reply buffer of a single INQUIRY.
pub type InquiryBuf = [u8; INQUIRY_BUF_LEN];

/// Errors talking to a SCSI device.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Opening or reading the device failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The ioctl failed or the driver reported a failed command.
    #[error("{0}")]
    DriverError(String),
    /// The reply is for another VPD page than requested.
    #[error("{kernel}: invalid VPD page: {page:x}")]
    InvalidPage { kernel: String, page: u8 },
    /// The reply doesn't fit the format of its page.
    #[error("{kernel}: {message}")]
    Malformed { kernel: String, message: String },
    /// One of the inquiry steps failed.
    #[error("{step} inquiry failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },
}

/// Peripheral device type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Direct access block device, including host managed zoned ones.
    Disk,
    Tape,
    Optical,
    Cd,
    Unknown,
}

impl DeviceType {
    fn from_peripheral(byte: u8) -> Self {
        match byte & 0x1f {
            0 | 0x0e => DeviceType::Disk,
            1 => DeviceType::Tape,
            4 | 7 | 0x0f => DeviceType::Optical,
            5 => DeviceType::Cd,
            _ => DeviceType::Unknown,
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceType::Disk => "disk",
            DeviceType::Tape => "tape",
            DeviceType::Optical => "optical",
            DeviceType::Cd => "cd",
            DeviceType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Identity of a SCSI device as reported by INQUIRY.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// T10 vendor id, space padded as reported.
    pub vendor: String,
    /// Product id.
    pub model: String,
    /// Product revision level.
    pub revision: String,
    #[serde(rename = "type")]
    pub type_: DeviceType,
    /// Device number as `major:minor`.
    pub kernel: String,
    /// `S` followed by vendor, model and the short serial.
    pub serial: String,
    /// Unit serial number from VPD page 0x80.
    pub serial_short: String,
    /// `0x` prefixed hex designator, empty when the device has none.
    pub wwn: String,
}

/// Something that can execute an INQUIRY.
pub trait Transport {
    /// Device number as `major:minor`.
    fn kernel(&self) -> Result<String, Error>;

    /// Sends the command descriptor block `cdb`, filling `buf` with the reply.
    fn execute(&mut self, cdb: &[u8; 6], buf: &mut InquiryBuf) -> Result<(), Error>;
}

/// INQUIRY command descriptor block.
pub fn inquiry_cdb(evpd: bool, page: u8) -> [u8; 6] {
    [INQUIRY_CMD, u8::from(evpd), page, 0, INQUIRY_BUF_LEN as u8, 0]
}

fn inquiry<T: Transport + ?Sized>(transport: &mut T, kernel: &str, evpd: bool, page: u8) -> Result<InquiryBuf, Error> {
    let mut buf = [0u8; INQUIRY_BUF_LEN];
    transport.execute(&inquiry_cdb(evpd, page), &mut buf)?;
    if evpd && buf[1] != page {
        return Err(Error::InvalidPage {
            kernel: kernel.to_string(),
            page,
        });
    }
    Ok(buf)
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn step(name: &'static str) -> impl FnOnce(Error) -> Error {
    move |source| Error::Step {
        step: name,
        source: Box::new(source),
    }
}

/// Runs the full INQUIRY sequence against `transport`.
pub fn inquire<T: Transport + ?Sized>(transport: &mut T) -> Result<Identity, Error> {
    let kernel = transport.kernel()?;

    let buf = inquiry(transport, &kernel, false, 0).map_err(step("standard"))?;
    let mut identity = Identity {
        vendor: text(&buf[8..16]),
        model: text(&buf[16..32]),
        revision: text(&buf[32..36]),
        type_: DeviceType::from_peripheral(buf[1]),
        kernel,
        serial: String::new(),
        serial_short: String::new(),
        wwn: String::new(),
    };

    let pages = supported_pages(transport, &identity.kernel).map_err(step("page 0"))?;
    if pages.contains(&PAGE_SERIAL) {
        serial_page(transport, &mut identity).map_err(step("page 80"))?;
    }
    if pages.contains(&PAGE_IDENTIFICATION) {
        identification_page(transport, &mut identity).map_err(step("page 83"))?;
    }
    debug!(kernel = %identity.kernel, wwn = %identity.wwn, "identified SCSI device");

    Ok(identity)
}

fn supported_pages<T: Transport + ?Sized>(transport: &mut T, kernel: &str) -> Result<Vec<u8>, Error> {
    let buf = inquiry(transport, kernel, true, PAGE_SUPPORTED)?;
    let len = usize::from(buf[3]);
    if len + 4 > INQUIRY_BUF_LEN {
        return Err(Error::Malformed {
            kernel: kernel.to_string(),
            message: "page 0 buffer too big".to_string(),
        });
    }
    Ok(buf[4..4 + len]
        .iter()
        .copied()
        .filter(|p| *p == PAGE_SERIAL || *p == PAGE_IDENTIFICATION)
        .collect())
}

fn serial_page<T: Transport + ?Sized>(transport: &mut T, identity: &mut Identity) -> Result<(), Error> {
    let buf = inquiry(transport, &identity.kernel, true, PAGE_SERIAL)?;
    let len = usize::from(buf[3]);
    let total = 1 + VENDOR_LEN + MODEL_LEN + len;
    if total > MAX_SERIAL_LEN || len + 4 > INQUIRY_BUF_LEN {
        return Err(Error::Malformed {
            kernel: identity.kernel.clone(),
            message: format!("{} is larger than {}", total, MAX_SERIAL_LEN),
        });
    }
    identity.serial_short = text(&buf[4..4 + len]);
    identity.serial = format!("S{}{}{}", identity.vendor, identity.model, identity.serial_short);
    Ok(())
}

fn identification_page<T: Transport + ?Sized>(transport: &mut T, identity: &mut Identity) -> Result<(), Error> {
    let buf = inquiry(transport, &identity.kernel, true, PAGE_IDENTIFICATION)?;
    if buf[6] != 0 {
        return Err(Error::Malformed {
            kernel: identity.kernel.clone(),
            message: "reply is not SPC-2/3 compliant".to_string(),
        });
    }

    let end = (usize::from(buf[3]) + 4).min(INQUIRY_BUF_LEN);
    let mut i = 4;
    while i + 4 <= end {
        let descriptor = &buf[i..end];
        let len = usize::from(descriptor[3]);
        if 4 + len > descriptor.len() {
            break;
        }
        if descriptor[0] & 0x0f != CODE_SET_ASCII {
            identity.wwn = format!("0x{}", hex::encode(&descriptor[4..4 + len]));
        }
        i += len + 4;
    }
    Ok(())
}

#[repr(C)]
struct SgIoHdr {
    interface_id: libc::c_int,
    dxfer_direction: libc::c_int,
    cmd_len: libc::c_uchar,
    mx_sb_len: libc::c_uchar,
    iovec_count: libc::c_ushort,
    dxfer_len: libc::c_uint,
    dxferp: *mut libc::c_void,
    cmdp: *const libc::c_uchar,
    sbp: *mut libc::c_uchar,
    timeout: libc::c_uint,
    flags: libc::c_uint,
    pack_id: libc::c_int,
    usr_ptr: *mut libc::c_void,
    status: libc::c_uchar,
    masked_status: libc::c_uchar,
    msg_status: libc::c_uchar,
    sb_len_wr: libc::c_uchar,
    host_status: libc::c_ushort,
    driver_status: libc::c_ushort,
    resid: libc::c_int,
    duration: libc::c_uint,
    info: libc::c_uint,
}

nix::ioctl_read_bad!(sg_get_version_num, SG_GET_VERSION_NUM, libc::c_int);
nix::ioctl_readwrite_bad!(sg_io, SG_IO, SgIoHdr);

/// A `/dev/sg*` style device.
#[derive(Debug)]
pub struct SgDevice {
    file: File,
    name: String,
}

impl SgDevice {
    /// Opens `path` and checks that it is driven by the v3 sg driver.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)?;

        let mut version: libc::c_int = 0;
        // SAFETY: the request writes a single int into `version`.
        unsafe { sg_get_version_num(file.as_raw_fd(), &mut version) }
            .map_err(|e| Error::DriverError(format!("{}: SG_GET_VERSION_NUM failed: {}", path.display(), e)))?;
        if version < MIN_SG_VERSION {
            return Err(Error::DriverError(format!(
                "no sg driver found for device at {}",
                path.display()
            )));
        }

        Ok(SgDevice {
            file,
            name: path.display().to_string(),
        })
    }
}

impl Transport for SgDevice {
    fn kernel(&self) -> Result<String, Error> {
        let rdev = self.file.metadata()?.rdev();
        Ok(format!(
            "{}:{}",
            nix::sys::stat::major(rdev),
            nix::sys::stat::minor(rdev)
        ))
    }

    fn execute(&mut self, cdb: &[u8; 6], buf: &mut InquiryBuf) -> Result<(), Error> {
        let mut sense = [0u8; SENSE_BUF_LEN];
        let mut hdr = SgIoHdr {
            interface_id: INTERFACE_ID,
            dxfer_direction: DXFER_FROM_DEV,
            cmd_len: cdb.len() as u8,
            mx_sb_len: SENSE_BUF_LEN as u8,
            iovec_count: 0,
            dxfer_len: INQUIRY_BUF_LEN as u32,
            dxferp: buf.as_mut_ptr().cast(),
            cmdp: cdb.as_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: TIMEOUT_MS,
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };
        // SAFETY: every pointer in `hdr` refers to a live buffer of the
        // advertised length for the duration of the call.
        unsafe { sg_io(self.file.as_raw_fd(), &mut hdr) }
            .map_err(|e| Error::DriverError(format!("{}: SG_IO failed: {}", self.name, e)))?;

        if hdr.status != 0 || hdr.host_status != 0 || hdr.driver_status != 0 {
            return Err(Error::DriverError(format!(
                "{}: command failed: status {:#x}, host status {:#x}, driver status {:#x}",
                self.name, hdr.status, hdr.host_status, hdr.driver_status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::collections::HashMap;

    /// Replies keyed by `(evpd, page)`.
    #[derive(Default)]
    pub(crate) struct Canned {
        pub(crate) replies: HashMap<(u8, u8), InquiryBuf>,
        pub(crate) sent: Vec<[u8; 6]>,
    }

    impl Transport for Canned {
        fn kernel(&self) -> Result<String, Error> {
            Ok("8:0".to_string())
        }

        fn execute(&mut self, cdb: &[u8; 6], buf: &mut InquiryBuf) -> Result<(), Error> {
            self.sent.push(*cdb);
            let reply = self
                .replies
                .get(&(cdb[1], cdb[2]))
                .ok_or_else(|| Error::DriverError("no reply".to_string()))?;
            buf.copy_from_slice(reply);
            Ok(())
        }
    }

    fn reply(bytes: &[(usize, &[u8])]) -> InquiryBuf {
        let mut buf = [0u8; INQUIRY_BUF_LEN];
        for (offset, data) in bytes {
            buf[*offset..*offset + data.len()].copy_from_slice(data);
        }
        buf
    }

    pub(crate) fn disk() -> Canned {
        let mut canned = Canned::default();
        canned.replies.insert(
            (0, 0),
            reply(&[(1, &[0x00]), (8, b"ATA     "), (16, b"QEMU HARDDISK   "), (32, b"2.5+")]),
        );
        canned
            .replies
            .insert((1, 0x00), reply(&[(1, &[0x00]), (3, &[3]), (4, &[0x00, 0x80, 0x83])]));
        canned
            .replies
            .insert((1, 0x80), reply(&[(1, &[0x80]), (3, &[8]), (4, b"QM00001 ")]));
        canned.replies.insert(
            (1, 0x83),
            reply(&[
                (1, &[0x83]),
                (3, &[20]),
                // ASCII vendor id descriptor, skipped.
                (4, &[0x02, 0x01, 0x00, 0x04]),
                (8, b"QEMU"),
                // Binary NAA descriptor.
                (12, &[0x01, 0x03, 0x00, 0x08]),
                (16, &[0x50, 0x01, 0x40, 0x50, 0x00, 0x00, 0x00, 0x01]),
            ]),
        );
        canned
    }

    #[test]
    fn inquiry_cdb_layout() {
        assert_eq!([0x12, 1, 0x83, 0, 252, 0], inquiry_cdb(true, 0x83));
        assert_eq!([0x12, 0, 0, 0, 252, 0], inquiry_cdb(false, 0));
    }

    #[test]
    fn identifies_a_disk() {
        let mut canned = disk();
        let identity = inquire(&mut canned).unwrap();
        assert_eq!(
            Identity {
                vendor: "ATA     ".to_string(),
                model: "QEMU HARDDISK   ".to_string(),
                revision: "2.5+".to_string(),
                type_: DeviceType::Disk,
                kernel: "8:0".to_string(),
                serial: "SATA     QEMU HARDDISK   QM00001 ".to_string(),
                serial_short: "QM00001 ".to_string(),
                wwn: "0x5001405000000001".to_string(),
            },
            identity
        );
        let pages: Vec<u8> = canned.sent.iter().map(|cdb| cdb[2]).collect();
        assert_eq!(vec![0x00, 0x00, 0x80, 0x83], pages);
    }

    #[test]
    fn unadvertised_pages_are_skipped() {
        let mut canned = disk();
        canned
            .replies
            .insert((1, 0x00), reply(&[(1, &[0x00]), (3, &[1]), (4, &[0x00])]));
        let identity = inquire(&mut canned).unwrap();
        assert_eq!("", identity.serial);
        assert_eq!("", identity.wwn);
        assert_eq!(2, canned.sent.len());
    }

    #[test]
    fn wrong_page_in_reply() {
        let mut canned = disk();
        canned
            .replies
            .insert((1, 0x80), reply(&[(1, &[0x83]), (3, &[8])]));
        let err = inquire(&mut canned).unwrap_err();
        assert_eq!("page 80 inquiry failed: 8:0: invalid VPD page: 80", err.to_string());
    }

    #[test]
    fn serial_too_long() {
        let mut canned = disk();
        canned
            .replies
            .insert((1, 0x80), reply(&[(1, &[0x80]), (3, &[240])]));
        let err = inquire(&mut canned).unwrap_err();
        assert!(err.to_string().contains("265 is larger than 256"), "{}", err);
    }

    #[test]
    fn non_compliant_identification_page() {
        let mut canned = disk();
        canned
            .replies
            .insert((1, 0x83), reply(&[(1, &[0x83]), (3, &[8]), (6, &[1])]));
        let err = inquire(&mut canned).unwrap_err();
        assert!(err.to_string().contains("not SPC-2/3 compliant"));
    }

    #[test]
    fn device_types() {
        assert_eq!(DeviceType::Tape, DeviceType::from_peripheral(0x01));
        assert_eq!(DeviceType::Cd, DeviceType::from_peripheral(0x25));
        assert_eq!(DeviceType::Optical, DeviceType::from_peripheral(0x07));
        assert_eq!(DeviceType::Disk, DeviceType::from_peripheral(0x0e));
        assert_eq!(DeviceType::Unknown, DeviceType::from_peripheral(0x03));
        assert_eq!("optical", DeviceType::Optical.to_string());
    }

    #[test]
    fn regular_file_is_not_an_sg_device() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = SgDevice::open(file.path()).unwrap_err();
        assert!(matches!(err, Error::DriverError(_)));
    }
}
