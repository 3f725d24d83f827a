//! System information and trustlet installation requests

use super::schema;
use super::{encode_b64, ResponseWriter};
use crate::device::{OsInfo, TeeVersion};
use crate::error::Result;
use quick_xml::events::BytesStart;

/// Memory a trustlet is loaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryType {
    InternalPreferred,
    Internal,
    #[default]
    External,
}

impl MemoryType {
    pub fn code(self) -> u32 {
        match self {
            MemoryType::InternalPreferred => 0,
            MemoryType::Internal => 1,
            MemoryType::External => 2,
        }
    }
}

/// What the caller wants installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustletPayload {
    /// Trustlet binary to be encrypted by the server
    Binary {
        data: Vec<u8>,
        memory_type: MemoryType,
        num_instances: u32,
        flags: u32,
    },
    /// Key the trustlet was encrypted with
    Key(Vec<u8>),
}

impl TrustletPayload {
    pub fn binary(data: Vec<u8>) -> Self {
        TrustletPayload::Binary {
            data,
            memory_type: MemoryType::default(),
            num_instances: 1,
            flags: 0,
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            TrustletPayload::Binary { data, .. } => data,
            TrustletPayload::Key(key) => key,
        }
    }
}

/// Trustlet installation request sent at the start of an install session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustletInstallationRequest {
    pub uuid: uuid::Uuid,
    pub payload: TrustletPayload,
    pub min_version: u32,
    pub puk_hash: Vec<u8>,
}

/// Build the `systemInformation` document.
pub fn build_system_info_document(version: &TeeVersion, os: &OsInfo) -> Result<Vec<u8>> {
    let mut doc = ResponseWriter::begin()?;

    let mut info = BytesStart::new("systemInformation");
    let fields = [
        ("imei", &os.imei_esn),
        ("mno", &os.mno),
        ("brand", &os.brand),
        ("manufacturer", &os.manufacturer),
        ("hardware", &os.hardware),
        ("model", &os.model),
        ("version", &os.version),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            info.push_attribute((name, value.as_str()));
        }
    }
    doc.start(info)?;

    let numbers = [
        ("versionMci", version.mci),
        ("versionSo", version.so),
        ("versionMclf", version.mclf),
        ("versionContainer", version.container),
        ("versionMcConfig", version.mc_config),
        ("versionTlApi", version.tl_api),
        ("versionDrApi", version.dr_api),
        ("versionCmp", version.cmp),
    ]
    .map(|(name, value)| (name, value.to_string()));

    let mut mc_version = BytesStart::new("mcpt:mcVersion");
    mc_version.push_attribute(("productId", version.product_id.as_str()));
    for (name, value) in &numbers {
        mc_version.push_attribute((*name, value.as_str()));
    }
    doc.empty(mc_version)?;

    doc.end("systemInformation")?;
    let document = doc.finish()?;
    schema::check_outgoing(&document);
    Ok(document)
}

/// Build the `tltInstallationRequest` document.
///
/// Binary-only attributes are written only when they differ from their
/// defaults.
pub fn build_trustlet_request_document(request: &TrustletInstallationRequest) -> Result<Vec<u8>> {
    let mut doc = ResponseWriter::begin()?;
    doc.start(BytesStart::new("tltInstallationRequest"))?;

    let min_version = request.min_version.to_string();
    let puk_hash = encode_b64(&request.puk_hash);

    let (name, optional) = match &request.payload {
        TrustletPayload::Binary {
            memory_type,
            num_instances,
            flags,
            ..
        } => {
            let mut optional = Vec::new();
            if *memory_type != MemoryType::default() {
                optional.push(("memoryType", memory_type.code().to_string()));
            }
            if *num_instances != 1 {
                optional.push(("numberOfInstances", num_instances.to_string()));
            }
            if *flags != 0 {
                optional.push(("flags", flags.to_string()));
            }
            ("trustletAxf", optional)
        }
        TrustletPayload::Key(_) => ("trustletEncryptionKey", Vec::new()),
    };

    let mut element = BytesStart::new(name);
    for (attr, value) in &optional {
        element.push_attribute((*attr, value.as_str()));
    }
    element.push_attribute(("minTltVersion", min_version.as_str()));
    element.push_attribute(("tltPukHash", puk_hash.as_str()));
    doc.start(element)?;
    doc.text(&encode_b64(request.payload.data()))?;
    doc.end(name)?;

    doc.end("tltInstallationRequest")?;
    let document = doc.finish()?;
    schema::check_outgoing(&document);
    Ok(document)
}
