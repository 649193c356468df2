//! OPC UA service messages.
//!
//! Each message body on the wire is an ExtensionObject-style envelope: the
//! ns=0 encoding node id, then the structure fields in Part 4 order. The
//! [`Message`] enum covers every service the toolkit speaks; unknown ids
//! decode to an error that the dispatcher maps to `BadServiceUnsupported`.

use bytes::{Buf, BufMut};

use crate::codec::{
    decode_array, encode_array, BinaryDecodable, BinaryEncodable, DecodeError, DiagnosticInfo,
};
use crate::status::StatusCode;
use crate::types::{
    DataValue, DateTimeTicks, ExpandedNodeId, ExtensionObject, LocalizedText, NodeId,
    QualifiedName, Variant,
};

/// ns=0 DefaultBinary encoding ids for every message and structure the
/// toolkit encodes by id.
pub mod ids {
    pub const ANONYMOUS_IDENTITY_TOKEN: u32 = 321;
    pub const USER_NAME_IDENTITY_TOKEN: u32 = 324;
    pub const X509_IDENTITY_TOKEN: u32 = 327;
    pub const SERVICE_FAULT: u32 = 397;
    pub const GET_ENDPOINTS_REQUEST: u32 = 428;
    pub const GET_ENDPOINTS_RESPONSE: u32 = 431;
    pub const OPEN_SECURE_CHANNEL_REQUEST: u32 = 446;
    pub const OPEN_SECURE_CHANNEL_RESPONSE: u32 = 449;
    pub const CLOSE_SECURE_CHANNEL_REQUEST: u32 = 452;
    pub const CREATE_SESSION_REQUEST: u32 = 461;
    pub const CREATE_SESSION_RESPONSE: u32 = 464;
    pub const ACTIVATE_SESSION_REQUEST: u32 = 467;
    pub const ACTIVATE_SESSION_RESPONSE: u32 = 470;
    pub const CLOSE_SESSION_REQUEST: u32 = 473;
    pub const CLOSE_SESSION_RESPONSE: u32 = 476;
    pub const BROWSE_REQUEST: u32 = 527;
    pub const BROWSE_RESPONSE: u32 = 530;
    pub const READ_REQUEST: u32 = 631;
    pub const READ_RESPONSE: u32 = 634;
    pub const WRITE_REQUEST: u32 = 673;
    pub const WRITE_RESPONSE: u32 = 676;
    pub const CALL_REQUEST: u32 = 712;
    pub const CALL_RESPONSE: u32 = 715;
    pub const CREATE_MONITORED_ITEMS_REQUEST: u32 = 751;
    pub const CREATE_MONITORED_ITEMS_RESPONSE: u32 = 754;
    pub const CREATE_SUBSCRIPTION_REQUEST: u32 = 787;
    pub const CREATE_SUBSCRIPTION_RESPONSE: u32 = 790;
    pub const PUBLISH_REQUEST: u32 = 826;
    pub const PUBLISH_RESPONSE: u32 = 829;
    pub const REPUBLISH_REQUEST: u32 = 832;
    pub const REPUBLISH_RESPONSE: u32 = 835;
    pub const DATA_CHANGE_NOTIFICATION: u32 = 811;
}

// ── Headers ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestHeader {
    pub authentication_token: NodeId,
    pub timestamp: DateTimeTicks,
    pub request_handle: u32,
    pub return_diagnostics: u32,
    pub audit_entry_id: Option<String>,
    pub timeout_hint: u32,
    pub additional_header: ExtensionObject,
}

impl BinaryEncodable for RequestHeader {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.authentication_token.encode(buf);
        buf.put_i64_le(self.timestamp);
        buf.put_u32_le(self.request_handle);
        buf.put_u32_le(self.return_diagnostics);
        self.audit_entry_id.encode(buf);
        buf.put_u32_le(self.timeout_hint);
        self.additional_header.encode(buf);
    }
}

impl BinaryDecodable for RequestHeader {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(RequestHeader {
            authentication_token: NodeId::decode(buf)?,
            timestamp: i64::decode(buf)?,
            request_handle: u32::decode(buf)?,
            return_diagnostics: u32::decode(buf)?,
            audit_entry_id: Option::<String>::decode(buf)?,
            timeout_hint: u32::decode(buf)?,
            additional_header: ExtensionObject::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseHeader {
    pub timestamp: DateTimeTicks,
    pub request_handle: u32,
    pub service_result: StatusCode,
    pub string_table: Option<Vec<Option<String>>>,
    pub additional_header: ExtensionObject,
}

impl ResponseHeader {
    pub fn for_request(handle: u32, result: StatusCode, timestamp: DateTimeTicks) -> Self {
        ResponseHeader {
            timestamp,
            request_handle: handle,
            service_result: result,
            string_table: None,
            additional_header: ExtensionObject::null(),
        }
    }
}

impl BinaryEncodable for ResponseHeader {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i64_le(self.timestamp);
        buf.put_u32_le(self.request_handle);
        self.service_result.encode(buf);
        DiagnosticInfo.encode(buf);
        encode_array(&self.string_table, buf);
        self.additional_header.encode(buf);
    }
}

impl BinaryDecodable for ResponseHeader {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let timestamp = i64::decode(buf)?;
        let request_handle = u32::decode(buf)?;
        let service_result = StatusCode::decode(buf)?;
        DiagnosticInfo::decode(buf)?;
        let string_table = decode_array::<Option<String>, _>(buf)?;
        let additional_header = ExtensionObject::decode(buf)?;
        Ok(ResponseHeader {
            timestamp,
            request_handle,
            service_result,
            string_table,
            additional_header,
        })
    }
}

// ── Secure channel services ───────────────────────────────────────────────────

/// Issue a new token set, or renew the token of the existing channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SecurityTokenRequestType {
    Issue = 0,
    Renew = 1,
}

impl SecurityTokenRequestType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Issue),
            1 => Some(Self::Renew),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenSecureChannelRequest {
    pub request_header: RequestHeader,
    pub client_protocol_version: u32,
    pub request_type: SecurityTokenRequestType,
    pub security_mode: u32,
    pub client_nonce: Option<Vec<u8>>,
    pub requested_lifetime: u32,
}

impl BinaryEncodable for OpenSecureChannelRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        buf.put_u32_le(self.client_protocol_version);
        buf.put_u32_le(self.request_type as u32);
        buf.put_u32_le(self.security_mode);
        self.client_nonce.encode(buf);
        buf.put_u32_le(self.requested_lifetime);
    }
}

impl BinaryDecodable for OpenSecureChannelRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let request_header = RequestHeader::decode(buf)?;
        let client_protocol_version = u32::decode(buf)?;
        let raw_type = u32::decode(buf)?;
        let request_type = SecurityTokenRequestType::from_u32(raw_type)
            .ok_or(DecodeError::InvalidLength(raw_type as i64))?;
        Ok(OpenSecureChannelRequest {
            request_header,
            client_protocol_version,
            request_type,
            security_mode: u32::decode(buf)?,
            client_nonce: Option::<Vec<u8>>::decode(buf)?,
            requested_lifetime: u32::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelSecurityToken {
    pub channel_id: u32,
    pub token_id: u32,
    pub created_at: DateTimeTicks,
    pub revised_lifetime: u32,
}

impl BinaryEncodable for ChannelSecurityToken {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.channel_id);
        buf.put_u32_le(self.token_id);
        buf.put_i64_le(self.created_at);
        buf.put_u32_le(self.revised_lifetime);
    }
}

impl BinaryDecodable for ChannelSecurityToken {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(ChannelSecurityToken {
            channel_id: u32::decode(buf)?,
            token_id: u32::decode(buf)?,
            created_at: i64::decode(buf)?,
            revised_lifetime: u32::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenSecureChannelResponse {
    pub response_header: ResponseHeader,
    pub server_protocol_version: u32,
    pub security_token: ChannelSecurityToken,
    pub server_nonce: Option<Vec<u8>>,
}

impl BinaryEncodable for OpenSecureChannelResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
        buf.put_u32_le(self.server_protocol_version);
        self.security_token.encode(buf);
        self.server_nonce.encode(buf);
    }
}

impl BinaryDecodable for OpenSecureChannelResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(OpenSecureChannelResponse {
            response_header: ResponseHeader::decode(buf)?,
            server_protocol_version: u32::decode(buf)?,
            security_token: ChannelSecurityToken::decode(buf)?,
            server_nonce: Option::<Vec<u8>>::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseSecureChannelRequest {
    pub request_header: RequestHeader,
}

impl BinaryEncodable for CloseSecureChannelRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
    }
}

impl BinaryDecodable for CloseSecureChannelRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CloseSecureChannelRequest {
            request_header: RequestHeader::decode(buf)?,
        })
    }
}

// ── Discovery ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplicationDescription {
    pub application_uri: Option<String>,
    pub product_uri: Option<String>,
    pub application_name: LocalizedText,
    pub application_type: u32,
    pub gateway_server_uri: Option<String>,
    pub discovery_profile_uri: Option<String>,
    pub discovery_urls: Option<Vec<Option<String>>>,
}

impl BinaryEncodable for ApplicationDescription {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.application_uri.encode(buf);
        self.product_uri.encode(buf);
        self.application_name.encode(buf);
        buf.put_u32_le(self.application_type);
        self.gateway_server_uri.encode(buf);
        self.discovery_profile_uri.encode(buf);
        encode_array(&self.discovery_urls, buf);
    }
}

impl BinaryDecodable for ApplicationDescription {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(ApplicationDescription {
            application_uri: Option::<String>::decode(buf)?,
            product_uri: Option::<String>::decode(buf)?,
            application_name: LocalizedText::decode(buf)?,
            application_type: u32::decode(buf)?,
            gateway_server_uri: Option::<String>::decode(buf)?,
            discovery_profile_uri: Option::<String>::decode(buf)?,
            discovery_urls: decode_array(buf)?,
        })
    }
}

/// UserTokenPolicy.tokenType wire values.
pub mod user_token_type {
    pub const ANONYMOUS: u32 = 0;
    pub const USER_NAME: u32 = 1;
    pub const CERTIFICATE: u32 = 2;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserTokenPolicy {
    pub policy_id: Option<String>,
    pub token_type: u32,
    pub issued_token_type: Option<String>,
    pub issuer_endpoint_url: Option<String>,
    pub security_policy_uri: Option<String>,
}

impl BinaryEncodable for UserTokenPolicy {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.policy_id.encode(buf);
        buf.put_u32_le(self.token_type);
        self.issued_token_type.encode(buf);
        self.issuer_endpoint_url.encode(buf);
        self.security_policy_uri.encode(buf);
    }
}

impl BinaryDecodable for UserTokenPolicy {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(UserTokenPolicy {
            policy_id: Option::<String>::decode(buf)?,
            token_type: u32::decode(buf)?,
            issued_token_type: Option::<String>::decode(buf)?,
            issuer_endpoint_url: Option::<String>::decode(buf)?,
            security_policy_uri: Option::<String>::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EndpointDescription {
    pub endpoint_url: Option<String>,
    pub server: ApplicationDescription,
    pub server_certificate: Option<Vec<u8>>,
    pub security_mode: u32,
    pub security_policy_uri: Option<String>,
    pub user_identity_tokens: Option<Vec<UserTokenPolicy>>,
    pub transport_profile_uri: Option<String>,
    pub security_level: u8,
}

impl BinaryEncodable for EndpointDescription {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.endpoint_url.encode(buf);
        self.server.encode(buf);
        self.server_certificate.encode(buf);
        buf.put_u32_le(self.security_mode);
        self.security_policy_uri.encode(buf);
        encode_array(&self.user_identity_tokens, buf);
        self.transport_profile_uri.encode(buf);
        buf.put_u8(self.security_level);
    }
}

impl BinaryDecodable for EndpointDescription {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(EndpointDescription {
            endpoint_url: Option::<String>::decode(buf)?,
            server: ApplicationDescription::decode(buf)?,
            server_certificate: Option::<Vec<u8>>::decode(buf)?,
            security_mode: u32::decode(buf)?,
            security_policy_uri: Option::<String>::decode(buf)?,
            user_identity_tokens: decode_array(buf)?,
            transport_profile_uri: Option::<String>::decode(buf)?,
            security_level: u8::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetEndpointsRequest {
    pub request_header: RequestHeader,
    pub endpoint_url: Option<String>,
    pub locale_ids: Option<Vec<Option<String>>>,
    pub profile_uris: Option<Vec<Option<String>>>,
}

impl BinaryEncodable for GetEndpointsRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        self.endpoint_url.encode(buf);
        encode_array(&self.locale_ids, buf);
        encode_array(&self.profile_uris, buf);
    }
}

impl BinaryDecodable for GetEndpointsRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(GetEndpointsRequest {
            request_header: RequestHeader::decode(buf)?,
            endpoint_url: Option::<String>::decode(buf)?,
            locale_ids: decode_array(buf)?,
            profile_uris: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetEndpointsResponse {
    pub response_header: ResponseHeader,
    pub endpoints: Option<Vec<EndpointDescription>>,
}

impl BinaryEncodable for GetEndpointsResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
        encode_array(&self.endpoints, buf);
    }
}

impl BinaryDecodable for GetEndpointsResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(GetEndpointsResponse {
            response_header: ResponseHeader::decode(buf)?,
            endpoints: decode_array(buf)?,
        })
    }
}

// ── Session services ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureData {
    pub algorithm: Option<String>,
    pub signature: Option<Vec<u8>>,
}

impl BinaryEncodable for SignatureData {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.algorithm.encode(buf);
        self.signature.encode(buf);
    }
}

impl BinaryDecodable for SignatureData {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(SignatureData {
            algorithm: Option::<String>::decode(buf)?,
            signature: Option::<Vec<u8>>::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignedSoftwareCertificate {
    pub certificate_data: Option<Vec<u8>>,
    pub signature: Option<Vec<u8>>,
}

impl BinaryEncodable for SignedSoftwareCertificate {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.certificate_data.encode(buf);
        self.signature.encode(buf);
    }
}

impl BinaryDecodable for SignedSoftwareCertificate {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(SignedSoftwareCertificate {
            certificate_data: Option::<Vec<u8>>::decode(buf)?,
            signature: Option::<Vec<u8>>::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSessionRequest {
    pub request_header: RequestHeader,
    pub client_description: ApplicationDescription,
    pub server_uri: Option<String>,
    pub endpoint_url: Option<String>,
    pub session_name: Option<String>,
    pub client_nonce: Option<Vec<u8>>,
    pub client_certificate: Option<Vec<u8>>,
    pub requested_session_timeout: f64,
    pub max_response_message_size: u32,
}

impl BinaryEncodable for CreateSessionRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        self.client_description.encode(buf);
        self.server_uri.encode(buf);
        self.endpoint_url.encode(buf);
        self.session_name.encode(buf);
        self.client_nonce.encode(buf);
        self.client_certificate.encode(buf);
        buf.put_f64_le(self.requested_session_timeout);
        buf.put_u32_le(self.max_response_message_size);
    }
}

impl BinaryDecodable for CreateSessionRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CreateSessionRequest {
            request_header: RequestHeader::decode(buf)?,
            client_description: ApplicationDescription::decode(buf)?,
            server_uri: Option::<String>::decode(buf)?,
            endpoint_url: Option::<String>::decode(buf)?,
            session_name: Option::<String>::decode(buf)?,
            client_nonce: Option::<Vec<u8>>::decode(buf)?,
            client_certificate: Option::<Vec<u8>>::decode(buf)?,
            requested_session_timeout: f64::decode(buf)?,
            max_response_message_size: u32::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSessionResponse {
    pub response_header: ResponseHeader,
    pub session_id: NodeId,
    pub authentication_token: NodeId,
    pub revised_session_timeout: f64,
    pub server_nonce: Option<Vec<u8>>,
    pub server_certificate: Option<Vec<u8>>,
    pub server_endpoints: Option<Vec<EndpointDescription>>,
    pub server_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
    pub server_signature: SignatureData,
    pub max_request_message_size: u32,
}

impl BinaryEncodable for CreateSessionResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
        self.session_id.encode(buf);
        self.authentication_token.encode(buf);
        buf.put_f64_le(self.revised_session_timeout);
        self.server_nonce.encode(buf);
        self.server_certificate.encode(buf);
        encode_array(&self.server_endpoints, buf);
        encode_array(&self.server_software_certificates, buf);
        self.server_signature.encode(buf);
        buf.put_u32_le(self.max_request_message_size);
    }
}

impl BinaryDecodable for CreateSessionResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CreateSessionResponse {
            response_header: ResponseHeader::decode(buf)?,
            session_id: NodeId::decode(buf)?,
            authentication_token: NodeId::decode(buf)?,
            revised_session_timeout: f64::decode(buf)?,
            server_nonce: Option::<Vec<u8>>::decode(buf)?,
            server_certificate: Option::<Vec<u8>>::decode(buf)?,
            server_endpoints: decode_array(buf)?,
            server_software_certificates: decode_array(buf)?,
            server_signature: SignatureData::decode(buf)?,
            max_request_message_size: u32::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivateSessionRequest {
    pub request_header: RequestHeader,
    pub client_signature: SignatureData,
    pub client_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
    pub locale_ids: Option<Vec<Option<String>>>,
    pub user_identity_token: ExtensionObject,
    pub user_token_signature: SignatureData,
}

impl BinaryEncodable for ActivateSessionRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        self.client_signature.encode(buf);
        encode_array(&self.client_software_certificates, buf);
        encode_array(&self.locale_ids, buf);
        self.user_identity_token.encode(buf);
        self.user_token_signature.encode(buf);
    }
}

impl BinaryDecodable for ActivateSessionRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(ActivateSessionRequest {
            request_header: RequestHeader::decode(buf)?,
            client_signature: SignatureData::decode(buf)?,
            client_software_certificates: decode_array(buf)?,
            locale_ids: decode_array(buf)?,
            user_identity_token: ExtensionObject::decode(buf)?,
            user_token_signature: SignatureData::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivateSessionResponse {
    pub response_header: ResponseHeader,
    pub server_nonce: Option<Vec<u8>>,
    pub results: Option<Vec<StatusCode>>,
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

impl BinaryEncodable for ActivateSessionResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
        self.server_nonce.encode(buf);
        encode_array(&self.results, buf);
        encode_array(&self.diagnostic_infos, buf);
    }
}

impl BinaryDecodable for ActivateSessionResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(ActivateSessionResponse {
            response_header: ResponseHeader::decode(buf)?,
            server_nonce: Option::<Vec<u8>>::decode(buf)?,
            results: decode_array(buf)?,
            diagnostic_infos: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseSessionRequest {
    pub request_header: RequestHeader,
    pub delete_subscriptions: bool,
}

impl BinaryEncodable for CloseSessionRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        self.delete_subscriptions.encode(buf);
    }
}

impl BinaryDecodable for CloseSessionRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CloseSessionRequest {
            request_header: RequestHeader::decode(buf)?,
            delete_subscriptions: bool::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseSessionResponse {
    pub response_header: ResponseHeader,
}

impl BinaryEncodable for CloseSessionResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
    }
}

impl BinaryDecodable for CloseSessionResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CloseSessionResponse {
            response_header: ResponseHeader::decode(buf)?,
        })
    }
}

// ── Identity tokens ───────────────────────────────────────────────────────────

/// A decoded user identity token from ActivateSession.
#[derive(Debug, Clone, PartialEq)]
pub enum UserIdentityToken {
    Anonymous {
        policy_id: Option<String>,
    },
    UserName {
        policy_id: Option<String>,
        user_name: Option<String>,
        /// Password bytes, possibly encrypted per the token security policy.
        password: Option<Vec<u8>>,
        encryption_algorithm: Option<String>,
    },
    X509 {
        policy_id: Option<String>,
        certificate_data: Option<Vec<u8>>,
    },
}

impl UserIdentityToken {
    pub fn policy_id(&self) -> Option<&str> {
        match self {
            UserIdentityToken::Anonymous { policy_id }
            | UserIdentityToken::UserName { policy_id, .. }
            | UserIdentityToken::X509 { policy_id, .. } => policy_id.as_deref(),
        }
    }

    /// Decode from the ActivateSession extension object. A null extension
    /// object means Anonymous with no policy, per Part 4.
    pub fn from_extension(ext: &ExtensionObject) -> Result<Self, StatusCode> {
        if ext.type_id.is_null() && ext.body.is_none() {
            return Ok(UserIdentityToken::Anonymous { policy_id: None });
        }
        let id = ext
            .type_id
            .as_ns0_numeric()
            .ok_or(StatusCode::BAD_IDENTITY_TOKEN_INVALID)?;
        let body = ext.body.as_deref().unwrap_or_default();
        let mut buf = body;
        let token = match id {
            ids::ANONYMOUS_IDENTITY_TOKEN => UserIdentityToken::Anonymous {
                policy_id: Option::<String>::decode(&mut buf)
                    .map_err(|_| StatusCode::BAD_IDENTITY_TOKEN_INVALID)?,
            },
            ids::USER_NAME_IDENTITY_TOKEN => {
                let decode = |buf: &mut &[u8]| -> Result<UserIdentityToken, DecodeError> {
                    Ok(UserIdentityToken::UserName {
                        policy_id: Option::<String>::decode(buf)?,
                        user_name: Option::<String>::decode(buf)?,
                        password: Option::<Vec<u8>>::decode(buf)?,
                        encryption_algorithm: Option::<String>::decode(buf)?,
                    })
                };
                decode(&mut buf).map_err(|_| StatusCode::BAD_IDENTITY_TOKEN_INVALID)?
            }
            ids::X509_IDENTITY_TOKEN => {
                let decode = |buf: &mut &[u8]| -> Result<UserIdentityToken, DecodeError> {
                    Ok(UserIdentityToken::X509 {
                        policy_id: Option::<String>::decode(buf)?,
                        certificate_data: Option::<Vec<u8>>::decode(buf)?,
                    })
                };
                decode(&mut buf).map_err(|_| StatusCode::BAD_IDENTITY_TOKEN_INVALID)?
            }
            _ => return Err(StatusCode::BAD_IDENTITY_TOKEN_INVALID),
        };
        Ok(token)
    }

    pub fn to_extension(&self) -> ExtensionObject {
        let mut body = Vec::new();
        let id = match self {
            UserIdentityToken::Anonymous { policy_id } => {
                policy_id.encode(&mut body);
                ids::ANONYMOUS_IDENTITY_TOKEN
            }
            UserIdentityToken::UserName {
                policy_id,
                user_name,
                password,
                encryption_algorithm,
            } => {
                policy_id.encode(&mut body);
                user_name.encode(&mut body);
                password.encode(&mut body);
                encryption_algorithm.encode(&mut body);
                ids::USER_NAME_IDENTITY_TOKEN
            }
            UserIdentityToken::X509 {
                policy_id,
                certificate_data,
            } => {
                policy_id.encode(&mut body);
                certificate_data.encode(&mut body);
                ids::X509_IDENTITY_TOKEN
            }
        };
        ExtensionObject::new(NodeId::numeric(0, id), body)
    }
}

// ── Read / Write ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ReadValueId {
    pub node_id: NodeId,
    pub attribute_id: u32,
    pub index_range: Option<String>,
    pub data_encoding: QualifiedName,
}

impl ReadValueId {
    pub fn value_of(node_id: NodeId) -> Self {
        ReadValueId {
            node_id,
            attribute_id: crate::types::AttributeId::Value as u32,
            index_range: None,
            data_encoding: QualifiedName::default(),
        }
    }
}

impl BinaryEncodable for ReadValueId {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.node_id.encode(buf);
        buf.put_u32_le(self.attribute_id);
        self.index_range.encode(buf);
        self.data_encoding.encode(buf);
    }
}

impl BinaryDecodable for ReadValueId {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(ReadValueId {
            node_id: NodeId::decode(buf)?,
            attribute_id: u32::decode(buf)?,
            index_range: Option::<String>::decode(buf)?,
            data_encoding: QualifiedName::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub request_header: RequestHeader,
    pub max_age: f64,
    pub timestamps_to_return: u32,
    pub nodes_to_read: Option<Vec<ReadValueId>>,
}

impl BinaryEncodable for ReadRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        buf.put_f64_le(self.max_age);
        buf.put_u32_le(self.timestamps_to_return);
        encode_array(&self.nodes_to_read, buf);
    }
}

impl BinaryDecodable for ReadRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(ReadRequest {
            request_header: RequestHeader::decode(buf)?,
            max_age: f64::decode(buf)?,
            timestamps_to_return: u32::decode(buf)?,
            nodes_to_read: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    pub response_header: ResponseHeader,
    pub results: Option<Vec<DataValue>>,
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

impl BinaryEncodable for ReadResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
        encode_array(&self.results, buf);
        encode_array(&self.diagnostic_infos, buf);
    }
}

impl BinaryDecodable for ReadResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(ReadResponse {
            response_header: ResponseHeader::decode(buf)?,
            results: decode_array(buf)?,
            diagnostic_infos: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteValue {
    pub node_id: NodeId,
    pub attribute_id: u32,
    pub index_range: Option<String>,
    pub value: DataValue,
}

impl BinaryEncodable for WriteValue {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.node_id.encode(buf);
        buf.put_u32_le(self.attribute_id);
        self.index_range.encode(buf);
        self.value.encode(buf);
    }
}

impl BinaryDecodable for WriteValue {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(WriteValue {
            node_id: NodeId::decode(buf)?,
            attribute_id: u32::decode(buf)?,
            index_range: Option::<String>::decode(buf)?,
            value: DataValue::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub request_header: RequestHeader,
    pub nodes_to_write: Option<Vec<WriteValue>>,
}

impl BinaryEncodable for WriteRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        encode_array(&self.nodes_to_write, buf);
    }
}

impl BinaryDecodable for WriteRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(WriteRequest {
            request_header: RequestHeader::decode(buf)?,
            nodes_to_write: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteResponse {
    pub response_header: ResponseHeader,
    pub results: Option<Vec<StatusCode>>,
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

impl BinaryEncodable for WriteResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
        encode_array(&self.results, buf);
        encode_array(&self.diagnostic_infos, buf);
    }
}

impl BinaryDecodable for WriteResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(WriteResponse {
            response_header: ResponseHeader::decode(buf)?,
            results: decode_array(buf)?,
            diagnostic_infos: decode_array(buf)?,
        })
    }
}

// ── Browse ────────────────────────────────────────────────────────────────────

/// BrowseDescription.browseDirection wire values.
pub mod browse_direction {
    pub const FORWARD: u32 = 0;
    pub const INVERSE: u32 = 1;
    pub const BOTH: u32 = 2;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewDescription {
    pub view_id: NodeId,
    pub timestamp: DateTimeTicks,
    pub view_version: u32,
}

impl BinaryEncodable for ViewDescription {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.view_id.encode(buf);
        buf.put_i64_le(self.timestamp);
        buf.put_u32_le(self.view_version);
    }
}

impl BinaryDecodable for ViewDescription {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(ViewDescription {
            view_id: NodeId::decode(buf)?,
            timestamp: i64::decode(buf)?,
            view_version: u32::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowseDescription {
    pub node_id: NodeId,
    pub browse_direction: u32,
    pub reference_type_id: NodeId,
    pub include_subtypes: bool,
    pub node_class_mask: u32,
    pub result_mask: u32,
}

impl BinaryEncodable for BrowseDescription {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.node_id.encode(buf);
        buf.put_u32_le(self.browse_direction);
        self.reference_type_id.encode(buf);
        self.include_subtypes.encode(buf);
        buf.put_u32_le(self.node_class_mask);
        buf.put_u32_le(self.result_mask);
    }
}

impl BinaryDecodable for BrowseDescription {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(BrowseDescription {
            node_id: NodeId::decode(buf)?,
            browse_direction: u32::decode(buf)?,
            reference_type_id: NodeId::decode(buf)?,
            include_subtypes: bool::decode(buf)?,
            node_class_mask: u32::decode(buf)?,
            result_mask: u32::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDescription {
    pub reference_type_id: NodeId,
    pub is_forward: bool,
    pub node_id: ExpandedNodeId,
    pub browse_name: QualifiedName,
    pub display_name: LocalizedText,
    pub node_class: u32,
    pub type_definition: ExpandedNodeId,
}

impl BinaryEncodable for ReferenceDescription {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.reference_type_id.encode(buf);
        self.is_forward.encode(buf);
        self.node_id.encode(buf);
        self.browse_name.encode(buf);
        self.display_name.encode(buf);
        buf.put_u32_le(self.node_class);
        self.type_definition.encode(buf);
    }
}

impl BinaryDecodable for ReferenceDescription {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(ReferenceDescription {
            reference_type_id: NodeId::decode(buf)?,
            is_forward: bool::decode(buf)?,
            node_id: ExpandedNodeId::decode(buf)?,
            browse_name: QualifiedName::decode(buf)?,
            display_name: LocalizedText::decode(buf)?,
            node_class: u32::decode(buf)?,
            type_definition: ExpandedNodeId::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowseResult {
    pub status_code: StatusCode,
    pub continuation_point: Option<Vec<u8>>,
    pub references: Option<Vec<ReferenceDescription>>,
}

impl BinaryEncodable for BrowseResult {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.status_code.encode(buf);
        self.continuation_point.encode(buf);
        encode_array(&self.references, buf);
    }
}

impl BinaryDecodable for BrowseResult {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(BrowseResult {
            status_code: StatusCode::decode(buf)?,
            continuation_point: Option::<Vec<u8>>::decode(buf)?,
            references: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowseRequest {
    pub request_header: RequestHeader,
    pub view: ViewDescription,
    pub requested_max_references_per_node: u32,
    pub nodes_to_browse: Option<Vec<BrowseDescription>>,
}

impl BinaryEncodable for BrowseRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        self.view.encode(buf);
        buf.put_u32_le(self.requested_max_references_per_node);
        encode_array(&self.nodes_to_browse, buf);
    }
}

impl BinaryDecodable for BrowseRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(BrowseRequest {
            request_header: RequestHeader::decode(buf)?,
            view: ViewDescription::decode(buf)?,
            requested_max_references_per_node: u32::decode(buf)?,
            nodes_to_browse: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowseResponse {
    pub response_header: ResponseHeader,
    pub results: Option<Vec<BrowseResult>>,
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

impl BinaryEncodable for BrowseResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
        encode_array(&self.results, buf);
        encode_array(&self.diagnostic_infos, buf);
    }
}

impl BinaryDecodable for BrowseResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(BrowseResponse {
            response_header: ResponseHeader::decode(buf)?,
            results: decode_array(buf)?,
            diagnostic_infos: decode_array(buf)?,
        })
    }
}

// ── Call ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CallMethodRequest {
    pub object_id: NodeId,
    pub method_id: NodeId,
    pub input_arguments: Option<Vec<Variant>>,
}

impl BinaryEncodable for CallMethodRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.object_id.encode(buf);
        self.method_id.encode(buf);
        encode_array(&self.input_arguments, buf);
    }
}

impl BinaryDecodable for CallMethodRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CallMethodRequest {
            object_id: NodeId::decode(buf)?,
            method_id: NodeId::decode(buf)?,
            input_arguments: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallMethodResult {
    pub status_code: StatusCode,
    pub input_argument_results: Option<Vec<StatusCode>>,
    pub input_argument_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    pub output_arguments: Option<Vec<Variant>>,
}

impl BinaryEncodable for CallMethodResult {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.status_code.encode(buf);
        encode_array(&self.input_argument_results, buf);
        encode_array(&self.input_argument_diagnostic_infos, buf);
        encode_array(&self.output_arguments, buf);
    }
}

impl BinaryDecodable for CallMethodResult {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CallMethodResult {
            status_code: StatusCode::decode(buf)?,
            input_argument_results: decode_array(buf)?,
            input_argument_diagnostic_infos: decode_array(buf)?,
            output_arguments: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub request_header: RequestHeader,
    pub methods_to_call: Option<Vec<CallMethodRequest>>,
}

impl BinaryEncodable for CallRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        encode_array(&self.methods_to_call, buf);
    }
}

impl BinaryDecodable for CallRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CallRequest {
            request_header: RequestHeader::decode(buf)?,
            methods_to_call: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallResponse {
    pub response_header: ResponseHeader,
    pub results: Option<Vec<CallMethodResult>>,
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

impl BinaryEncodable for CallResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
        encode_array(&self.results, buf);
        encode_array(&self.diagnostic_infos, buf);
    }
}

impl BinaryDecodable for CallResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CallResponse {
            response_header: ResponseHeader::decode(buf)?,
            results: decode_array(buf)?,
            diagnostic_infos: decode_array(buf)?,
        })
    }
}

// ── Subscriptions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSubscriptionRequest {
    pub request_header: RequestHeader,
    pub requested_publishing_interval: f64,
    pub requested_lifetime_count: u32,
    pub requested_max_keep_alive_count: u32,
    pub max_notifications_per_publish: u32,
    pub publishing_enabled: bool,
    pub priority: u8,
}

impl BinaryEncodable for CreateSubscriptionRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        buf.put_f64_le(self.requested_publishing_interval);
        buf.put_u32_le(self.requested_lifetime_count);
        buf.put_u32_le(self.requested_max_keep_alive_count);
        buf.put_u32_le(self.max_notifications_per_publish);
        self.publishing_enabled.encode(buf);
        buf.put_u8(self.priority);
    }
}

impl BinaryDecodable for CreateSubscriptionRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CreateSubscriptionRequest {
            request_header: RequestHeader::decode(buf)?,
            requested_publishing_interval: f64::decode(buf)?,
            requested_lifetime_count: u32::decode(buf)?,
            requested_max_keep_alive_count: u32::decode(buf)?,
            max_notifications_per_publish: u32::decode(buf)?,
            publishing_enabled: bool::decode(buf)?,
            priority: u8::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSubscriptionResponse {
    pub response_header: ResponseHeader,
    pub subscription_id: u32,
    pub revised_publishing_interval: f64,
    pub revised_lifetime_count: u32,
    pub revised_max_keep_alive_count: u32,
}

impl BinaryEncodable for CreateSubscriptionResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
        buf.put_u32_le(self.subscription_id);
        buf.put_f64_le(self.revised_publishing_interval);
        buf.put_u32_le(self.revised_lifetime_count);
        buf.put_u32_le(self.revised_max_keep_alive_count);
    }
}

impl BinaryDecodable for CreateSubscriptionResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CreateSubscriptionResponse {
            response_header: ResponseHeader::decode(buf)?,
            subscription_id: u32::decode(buf)?,
            revised_publishing_interval: f64::decode(buf)?,
            revised_lifetime_count: u32::decode(buf)?,
            revised_max_keep_alive_count: u32::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringParameters {
    pub client_handle: u32,
    pub sampling_interval: f64,
    pub filter: ExtensionObject,
    pub queue_size: u32,
    pub discard_oldest: bool,
}

impl BinaryEncodable for MonitoringParameters {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.client_handle);
        buf.put_f64_le(self.sampling_interval);
        self.filter.encode(buf);
        buf.put_u32_le(self.queue_size);
        self.discard_oldest.encode(buf);
    }
}

impl BinaryDecodable for MonitoringParameters {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(MonitoringParameters {
            client_handle: u32::decode(buf)?,
            sampling_interval: f64::decode(buf)?,
            filter: ExtensionObject::decode(buf)?,
            queue_size: u32::decode(buf)?,
            discard_oldest: bool::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemCreateRequest {
    pub item_to_monitor: ReadValueId,
    pub monitoring_mode: u32,
    pub requested_parameters: MonitoringParameters,
}

impl BinaryEncodable for MonitoredItemCreateRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.item_to_monitor.encode(buf);
        buf.put_u32_le(self.monitoring_mode);
        self.requested_parameters.encode(buf);
    }
}

impl BinaryDecodable for MonitoredItemCreateRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(MonitoredItemCreateRequest {
            item_to_monitor: ReadValueId::decode(buf)?,
            monitoring_mode: u32::decode(buf)?,
            requested_parameters: MonitoringParameters::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemCreateResult {
    pub status_code: StatusCode,
    pub monitored_item_id: u32,
    pub revised_sampling_interval: f64,
    pub revised_queue_size: u32,
    pub filter_result: ExtensionObject,
}

impl BinaryEncodable for MonitoredItemCreateResult {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.status_code.encode(buf);
        buf.put_u32_le(self.monitored_item_id);
        buf.put_f64_le(self.revised_sampling_interval);
        buf.put_u32_le(self.revised_queue_size);
        self.filter_result.encode(buf);
    }
}

impl BinaryDecodable for MonitoredItemCreateResult {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(MonitoredItemCreateResult {
            status_code: StatusCode::decode(buf)?,
            monitored_item_id: u32::decode(buf)?,
            revised_sampling_interval: f64::decode(buf)?,
            revised_queue_size: u32::decode(buf)?,
            filter_result: ExtensionObject::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateMonitoredItemsRequest {
    pub request_header: RequestHeader,
    pub subscription_id: u32,
    pub timestamps_to_return: u32,
    pub items_to_create: Option<Vec<MonitoredItemCreateRequest>>,
}

impl BinaryEncodable for CreateMonitoredItemsRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        buf.put_u32_le(self.subscription_id);
        buf.put_u32_le(self.timestamps_to_return);
        encode_array(&self.items_to_create, buf);
    }
}

impl BinaryDecodable for CreateMonitoredItemsRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CreateMonitoredItemsRequest {
            request_header: RequestHeader::decode(buf)?,
            subscription_id: u32::decode(buf)?,
            timestamps_to_return: u32::decode(buf)?,
            items_to_create: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateMonitoredItemsResponse {
    pub response_header: ResponseHeader,
    pub results: Option<Vec<MonitoredItemCreateResult>>,
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

impl BinaryEncodable for CreateMonitoredItemsResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
        encode_array(&self.results, buf);
        encode_array(&self.diagnostic_infos, buf);
    }
}

impl BinaryDecodable for CreateMonitoredItemsResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(CreateMonitoredItemsResponse {
            response_header: ResponseHeader::decode(buf)?,
            results: decode_array(buf)?,
            diagnostic_infos: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionAcknowledgement {
    pub subscription_id: u32,
    pub sequence_number: u32,
}

impl BinaryEncodable for SubscriptionAcknowledgement {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.subscription_id);
        buf.put_u32_le(self.sequence_number);
    }
}

impl BinaryDecodable for SubscriptionAcknowledgement {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(SubscriptionAcknowledgement {
            subscription_id: u32::decode(buf)?,
            sequence_number: u32::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub request_header: RequestHeader,
    pub subscription_acknowledgements: Option<Vec<SubscriptionAcknowledgement>>,
}

impl BinaryEncodable for PublishRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        encode_array(&self.subscription_acknowledgements, buf);
    }
}

impl BinaryDecodable for PublishRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(PublishRequest {
            request_header: RequestHeader::decode(buf)?,
            subscription_acknowledgements: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub sequence_number: u32,
    pub publish_time: DateTimeTicks,
    pub notification_data: Option<Vec<ExtensionObject>>,
}

impl NotificationMessage {
    /// An empty keep-alive message carrying the given sequence number.
    pub fn keep_alive(sequence_number: u32, publish_time: DateTimeTicks) -> Self {
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: None,
        }
    }
}

impl BinaryEncodable for NotificationMessage {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.sequence_number);
        buf.put_i64_le(self.publish_time);
        encode_array(&self.notification_data, buf);
    }
}

impl BinaryDecodable for NotificationMessage {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(NotificationMessage {
            sequence_number: u32::decode(buf)?,
            publish_time: i64::decode(buf)?,
            notification_data: decode_array(buf)?,
        })
    }
}

/// DataChangeNotification — carried inside NotificationMessage as an
/// extension object body.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemNotification {
    pub client_handle: u32,
    pub value: DataValue,
}

impl BinaryEncodable for MonitoredItemNotification {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.client_handle);
        self.value.encode(buf);
    }
}

impl BinaryDecodable for MonitoredItemNotification {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(MonitoredItemNotification {
            client_handle: u32::decode(buf)?,
            value: DataValue::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataChangeNotification {
    pub monitored_items: Option<Vec<MonitoredItemNotification>>,
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

impl DataChangeNotification {
    pub fn to_extension(&self) -> ExtensionObject {
        let mut body = Vec::new();
        encode_array(&self.monitored_items, &mut body);
        encode_array(&self.diagnostic_infos, &mut body);
        ExtensionObject::new(NodeId::numeric(0, ids::DATA_CHANGE_NOTIFICATION), body)
    }

    pub fn from_extension(ext: &ExtensionObject) -> Result<Self, DecodeError> {
        let mut buf = ext.body.as_deref().unwrap_or_default();
        Ok(DataChangeNotification {
            monitored_items: decode_array(&mut buf)?,
            diagnostic_infos: decode_array(&mut buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishResponse {
    pub response_header: ResponseHeader,
    pub subscription_id: u32,
    pub available_sequence_numbers: Option<Vec<u32>>,
    pub more_notifications: bool,
    pub notification_message: NotificationMessage,
    pub results: Option<Vec<StatusCode>>,
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

impl BinaryEncodable for PublishResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
        buf.put_u32_le(self.subscription_id);
        encode_array(&self.available_sequence_numbers, buf);
        self.more_notifications.encode(buf);
        self.notification_message.encode(buf);
        encode_array(&self.results, buf);
        encode_array(&self.diagnostic_infos, buf);
    }
}

impl BinaryDecodable for PublishResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(PublishResponse {
            response_header: ResponseHeader::decode(buf)?,
            subscription_id: u32::decode(buf)?,
            available_sequence_numbers: decode_array(buf)?,
            more_notifications: bool::decode(buf)?,
            notification_message: NotificationMessage::decode(buf)?,
            results: decode_array(buf)?,
            diagnostic_infos: decode_array(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepublishRequest {
    pub request_header: RequestHeader,
    pub subscription_id: u32,
    pub retransmit_sequence_number: u32,
}

impl BinaryEncodable for RepublishRequest {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.request_header.encode(buf);
        buf.put_u32_le(self.subscription_id);
        buf.put_u32_le(self.retransmit_sequence_number);
    }
}

impl BinaryDecodable for RepublishRequest {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(RepublishRequest {
            request_header: RequestHeader::decode(buf)?,
            subscription_id: u32::decode(buf)?,
            retransmit_sequence_number: u32::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepublishResponse {
    pub response_header: ResponseHeader,
    pub notification_message: NotificationMessage,
}

impl BinaryEncodable for RepublishResponse {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
        self.notification_message.encode(buf);
    }
}

impl BinaryDecodable for RepublishResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(RepublishResponse {
            response_header: ResponseHeader::decode(buf)?,
            notification_message: NotificationMessage::decode(buf)?,
        })
    }
}

// ── ServiceFault ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceFault {
    pub response_header: ResponseHeader,
}

impl BinaryEncodable for ServiceFault {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.response_header.encode(buf);
    }
}

impl BinaryDecodable for ServiceFault {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(ServiceFault {
            response_header: ResponseHeader::decode(buf)?,
        })
    }
}

// ── Message union ─────────────────────────────────────────────────────────────

/// Every message the toolkit can carry in an OPN or MSG body.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    OpenSecureChannelRequest(OpenSecureChannelRequest),
    OpenSecureChannelResponse(OpenSecureChannelResponse),
    CloseSecureChannelRequest(CloseSecureChannelRequest),
    GetEndpointsRequest(GetEndpointsRequest),
    GetEndpointsResponse(GetEndpointsResponse),
    CreateSessionRequest(CreateSessionRequest),
    CreateSessionResponse(CreateSessionResponse),
    ActivateSessionRequest(ActivateSessionRequest),
    ActivateSessionResponse(ActivateSessionResponse),
    CloseSessionRequest(CloseSessionRequest),
    CloseSessionResponse(CloseSessionResponse),
    ReadRequest(ReadRequest),
    ReadResponse(ReadResponse),
    WriteRequest(WriteRequest),
    WriteResponse(WriteResponse),
    BrowseRequest(BrowseRequest),
    BrowseResponse(BrowseResponse),
    CallRequest(CallRequest),
    CallResponse(CallResponse),
    CreateSubscriptionRequest(CreateSubscriptionRequest),
    CreateSubscriptionResponse(CreateSubscriptionResponse),
    CreateMonitoredItemsRequest(CreateMonitoredItemsRequest),
    CreateMonitoredItemsResponse(CreateMonitoredItemsResponse),
    PublishRequest(PublishRequest),
    PublishResponse(PublishResponse),
    RepublishRequest(RepublishRequest),
    RepublishResponse(RepublishResponse),
    ServiceFault(ServiceFault),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("unknown or unsupported message encoding id {0}")]
    UnknownEncodingId(u32),

    #[error("message encoding id is not a ns=0 numeric node: {0}")]
    BadEncodingNode(NodeId),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl MessageError {
    pub fn status(&self) -> StatusCode {
        match self {
            MessageError::UnknownEncodingId(_) | MessageError::BadEncodingNode(_) => {
                StatusCode::BAD_SERVICE_UNSUPPORTED
            }
            MessageError::Decode(e) => e.status(),
        }
    }
}

impl Message {
    /// The ns=0 DefaultBinary encoding id of this message.
    pub fn encoding_id(&self) -> u32 {
        match self {
            Message::OpenSecureChannelRequest(_) => ids::OPEN_SECURE_CHANNEL_REQUEST,
            Message::OpenSecureChannelResponse(_) => ids::OPEN_SECURE_CHANNEL_RESPONSE,
            Message::CloseSecureChannelRequest(_) => ids::CLOSE_SECURE_CHANNEL_REQUEST,
            Message::GetEndpointsRequest(_) => ids::GET_ENDPOINTS_REQUEST,
            Message::GetEndpointsResponse(_) => ids::GET_ENDPOINTS_RESPONSE,
            Message::CreateSessionRequest(_) => ids::CREATE_SESSION_REQUEST,
            Message::CreateSessionResponse(_) => ids::CREATE_SESSION_RESPONSE,
            Message::ActivateSessionRequest(_) => ids::ACTIVATE_SESSION_REQUEST,
            Message::ActivateSessionResponse(_) => ids::ACTIVATE_SESSION_RESPONSE,
            Message::CloseSessionRequest(_) => ids::CLOSE_SESSION_REQUEST,
            Message::CloseSessionResponse(_) => ids::CLOSE_SESSION_RESPONSE,
            Message::ReadRequest(_) => ids::READ_REQUEST,
            Message::ReadResponse(_) => ids::READ_RESPONSE,
            Message::WriteRequest(_) => ids::WRITE_REQUEST,
            Message::WriteResponse(_) => ids::WRITE_RESPONSE,
            Message::BrowseRequest(_) => ids::BROWSE_REQUEST,
            Message::BrowseResponse(_) => ids::BROWSE_RESPONSE,
            Message::CallRequest(_) => ids::CALL_REQUEST,
            Message::CallResponse(_) => ids::CALL_RESPONSE,
            Message::CreateSubscriptionRequest(_) => ids::CREATE_SUBSCRIPTION_REQUEST,
            Message::CreateSubscriptionResponse(_) => ids::CREATE_SUBSCRIPTION_RESPONSE,
            Message::CreateMonitoredItemsRequest(_) => ids::CREATE_MONITORED_ITEMS_REQUEST,
            Message::CreateMonitoredItemsResponse(_) => ids::CREATE_MONITORED_ITEMS_RESPONSE,
            Message::PublishRequest(_) => ids::PUBLISH_REQUEST,
            Message::PublishResponse(_) => ids::PUBLISH_RESPONSE,
            Message::RepublishRequest(_) => ids::REPUBLISH_REQUEST,
            Message::RepublishResponse(_) => ids::REPUBLISH_RESPONSE,
            Message::ServiceFault(_) => ids::SERVICE_FAULT,
        }
    }

    pub fn is_request(&self) -> bool {
        self.request_header().is_some()
    }

    pub fn request_header(&self) -> Option<&RequestHeader> {
        Some(match self {
            Message::OpenSecureChannelRequest(m) => &m.request_header,
            Message::CloseSecureChannelRequest(m) => &m.request_header,
            Message::GetEndpointsRequest(m) => &m.request_header,
            Message::CreateSessionRequest(m) => &m.request_header,
            Message::ActivateSessionRequest(m) => &m.request_header,
            Message::CloseSessionRequest(m) => &m.request_header,
            Message::ReadRequest(m) => &m.request_header,
            Message::WriteRequest(m) => &m.request_header,
            Message::BrowseRequest(m) => &m.request_header,
            Message::CallRequest(m) => &m.request_header,
            Message::CreateSubscriptionRequest(m) => &m.request_header,
            Message::CreateMonitoredItemsRequest(m) => &m.request_header,
            Message::PublishRequest(m) => &m.request_header,
            Message::RepublishRequest(m) => &m.request_header,
            _ => return None,
        })
    }

    pub fn response_header(&self) -> Option<&ResponseHeader> {
        Some(match self {
            Message::OpenSecureChannelResponse(m) => &m.response_header,
            Message::GetEndpointsResponse(m) => &m.response_header,
            Message::CreateSessionResponse(m) => &m.response_header,
            Message::ActivateSessionResponse(m) => &m.response_header,
            Message::CloseSessionResponse(m) => &m.response_header,
            Message::ReadResponse(m) => &m.response_header,
            Message::WriteResponse(m) => &m.response_header,
            Message::BrowseResponse(m) => &m.response_header,
            Message::CallResponse(m) => &m.response_header,
            Message::CreateSubscriptionResponse(m) => &m.response_header,
            Message::CreateMonitoredItemsResponse(m) => &m.response_header,
            Message::PublishResponse(m) => &m.response_header,
            Message::RepublishResponse(m) => &m.response_header,
            Message::ServiceFault(m) => &m.response_header,
            _ => return None,
        })
    }

    /// Encode with the leading encoding-id NodeId, ready for a chunk body.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        NodeId::numeric(0, self.encoding_id()).encode(&mut out);
        match self {
            Message::OpenSecureChannelRequest(m) => m.encode(&mut out),
            Message::OpenSecureChannelResponse(m) => m.encode(&mut out),
            Message::CloseSecureChannelRequest(m) => m.encode(&mut out),
            Message::GetEndpointsRequest(m) => m.encode(&mut out),
            Message::GetEndpointsResponse(m) => m.encode(&mut out),
            Message::CreateSessionRequest(m) => m.encode(&mut out),
            Message::CreateSessionResponse(m) => m.encode(&mut out),
            Message::ActivateSessionRequest(m) => m.encode(&mut out),
            Message::ActivateSessionResponse(m) => m.encode(&mut out),
            Message::CloseSessionRequest(m) => m.encode(&mut out),
            Message::CloseSessionResponse(m) => m.encode(&mut out),
            Message::ReadRequest(m) => m.encode(&mut out),
            Message::ReadResponse(m) => m.encode(&mut out),
            Message::WriteRequest(m) => m.encode(&mut out),
            Message::WriteResponse(m) => m.encode(&mut out),
            Message::BrowseRequest(m) => m.encode(&mut out),
            Message::BrowseResponse(m) => m.encode(&mut out),
            Message::CallRequest(m) => m.encode(&mut out),
            Message::CallResponse(m) => m.encode(&mut out),
            Message::CreateSubscriptionRequest(m) => m.encode(&mut out),
            Message::CreateSubscriptionResponse(m) => m.encode(&mut out),
            Message::CreateMonitoredItemsRequest(m) => m.encode(&mut out),
            Message::CreateMonitoredItemsResponse(m) => m.encode(&mut out),
            Message::PublishRequest(m) => m.encode(&mut out),
            Message::PublishResponse(m) => m.encode(&mut out),
            Message::RepublishRequest(m) => m.encode(&mut out),
            Message::RepublishResponse(m) => m.encode(&mut out),
            Message::ServiceFault(m) => m.encode(&mut out),
        }
        out
    }

    /// Decode a chunk body: leading encoding-id NodeId, then the structure.
    pub fn decode_body<B: Buf>(buf: &mut B) -> Result<Message, MessageError> {
        let type_id = NodeId::decode(buf)?;
        let id = type_id
            .as_ns0_numeric()
            .ok_or_else(|| MessageError::BadEncodingNode(type_id.clone()))?;
        Ok(match id {
            ids::OPEN_SECURE_CHANNEL_REQUEST => {
                Message::OpenSecureChannelRequest(OpenSecureChannelRequest::decode(buf)?)
            }
            ids::OPEN_SECURE_CHANNEL_RESPONSE => {
                Message::OpenSecureChannelResponse(OpenSecureChannelResponse::decode(buf)?)
            }
            ids::CLOSE_SECURE_CHANNEL_REQUEST => {
                Message::CloseSecureChannelRequest(CloseSecureChannelRequest::decode(buf)?)
            }
            ids::GET_ENDPOINTS_REQUEST => {
                Message::GetEndpointsRequest(GetEndpointsRequest::decode(buf)?)
            }
            ids::GET_ENDPOINTS_RESPONSE => {
                Message::GetEndpointsResponse(GetEndpointsResponse::decode(buf)?)
            }
            ids::CREATE_SESSION_REQUEST => {
                Message::CreateSessionRequest(CreateSessionRequest::decode(buf)?)
            }
            ids::CREATE_SESSION_RESPONSE => {
                Message::CreateSessionResponse(CreateSessionResponse::decode(buf)?)
            }
            ids::ACTIVATE_SESSION_REQUEST => {
                Message::ActivateSessionRequest(ActivateSessionRequest::decode(buf)?)
            }
            ids::ACTIVATE_SESSION_RESPONSE => {
                Message::ActivateSessionResponse(ActivateSessionResponse::decode(buf)?)
            }
            ids::CLOSE_SESSION_REQUEST => {
                Message::CloseSessionRequest(CloseSessionRequest::decode(buf)?)
            }
            ids::CLOSE_SESSION_RESPONSE => {
                Message::CloseSessionResponse(CloseSessionResponse::decode(buf)?)
            }
            ids::READ_REQUEST => Message::ReadRequest(ReadRequest::decode(buf)?),
            ids::READ_RESPONSE => Message::ReadResponse(ReadResponse::decode(buf)?),
            ids::WRITE_REQUEST => Message::WriteRequest(WriteRequest::decode(buf)?),
            ids::WRITE_RESPONSE => Message::WriteResponse(WriteResponse::decode(buf)?),
            ids::BROWSE_REQUEST => Message::BrowseRequest(BrowseRequest::decode(buf)?),
            ids::BROWSE_RESPONSE => Message::BrowseResponse(BrowseResponse::decode(buf)?),
            ids::CALL_REQUEST => Message::CallRequest(CallRequest::decode(buf)?),
            ids::CALL_RESPONSE => Message::CallResponse(CallResponse::decode(buf)?),
            ids::CREATE_SUBSCRIPTION_REQUEST => {
                Message::CreateSubscriptionRequest(CreateSubscriptionRequest::decode(buf)?)
            }
            ids::CREATE_SUBSCRIPTION_RESPONSE => {
                Message::CreateSubscriptionResponse(CreateSubscriptionResponse::decode(buf)?)
            }
            ids::CREATE_MONITORED_ITEMS_REQUEST => {
                Message::CreateMonitoredItemsRequest(CreateMonitoredItemsRequest::decode(buf)?)
            }
            ids::CREATE_MONITORED_ITEMS_RESPONSE => {
                Message::CreateMonitoredItemsResponse(CreateMonitoredItemsResponse::decode(buf)?)
            }
            ids::PUBLISH_REQUEST => Message::PublishRequest(PublishRequest::decode(buf)?),
            ids::PUBLISH_RESPONSE => Message::PublishResponse(PublishResponse::decode(buf)?),
            ids::REPUBLISH_REQUEST => Message::RepublishRequest(RepublishRequest::decode(buf)?),
            ids::REPUBLISH_RESPONSE => Message::RepublishResponse(RepublishResponse::decode(buf)?),
            ids::SERVICE_FAULT => Message::ServiceFault(ServiceFault::decode(buf)?),
            other => return Err(MessageError::UnknownEncodingId(other)),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn header(handle: u32) -> RequestHeader {
        RequestHeader {
            authentication_token: NodeId::null(),
            timestamp: 0,
            request_handle: handle,
            return_diagnostics: 0,
            audit_entry_id: None,
            timeout_hint: 10_000,
            additional_header: ExtensionObject::null(),
        }
    }

    fn round_trip(msg: Message) {
        let body = msg.encode_body();
        let decoded = Message::decode_body(&mut body.as_slice()).expect("decode");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn open_secure_channel_round_trip() {
        round_trip(Message::OpenSecureChannelRequest(OpenSecureChannelRequest {
            request_header: header(1),
            client_protocol_version: 0,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: 1,
            client_nonce: None,
            requested_lifetime: 3_600_000,
        }));
        round_trip(Message::OpenSecureChannelResponse(OpenSecureChannelResponse {
            response_header: ResponseHeader::for_request(1, StatusCode::GOOD, 0),
            server_protocol_version: 0,
            security_token: ChannelSecurityToken {
                channel_id: 4,
                token_id: 1,
                created_at: 0,
                revised_lifetime: 3_600_000,
            },
            server_nonce: Some(vec![1; 32]),
        }));
    }

    #[test]
    fn read_write_round_trip() {
        round_trip(Message::ReadRequest(ReadRequest {
            request_header: header(7),
            max_age: 0.0,
            timestamps_to_return: 2,
            nodes_to_read: Some(vec![ReadValueId::value_of(NodeId::numeric(0, 2259))]),
        }));
        round_trip(Message::WriteRequest(WriteRequest {
            request_header: header(8),
            nodes_to_write: Some(vec![WriteValue {
                node_id: NodeId::string(2, "Demo.Int32"),
                attribute_id: 13,
                index_range: Some("1:3".into()),
                value: DataValue::new(Variant::Int32(42)),
            }]),
        }));
        round_trip(Message::WriteResponse(WriteResponse {
            response_header: ResponseHeader::for_request(8, StatusCode::GOOD, 0),
            results: Some(vec![StatusCode::GOOD, StatusCode::BAD_NOT_WRITABLE]),
            diagnostic_infos: None,
        }));
    }

    #[test]
    fn session_round_trip() {
        round_trip(Message::CreateSessionRequest(CreateSessionRequest {
            request_header: header(2),
            client_description: ApplicationDescription {
                application_uri: Some("urn:cairn:client".into()),
                application_name: LocalizedText::new("cairn client"),
                application_type: 1,
                ..Default::default()
            },
            server_uri: None,
            endpoint_url: Some("opc.tcp://localhost:4840/cairn".into()),
            session_name: Some("s1".into()),
            client_nonce: Some(vec![0xAA; 32]),
            client_certificate: None,
            requested_session_timeout: 30_000.0,
            max_response_message_size: 0,
        }));
        round_trip(Message::ActivateSessionRequest(ActivateSessionRequest {
            request_header: header(3),
            client_signature: SignatureData::default(),
            client_software_certificates: None,
            locale_ids: Some(vec![Some("en".into())]),
            user_identity_token: UserIdentityToken::UserName {
                policy_id: Some("username".into()),
                user_name: Some("user1".into()),
                password: Some(b"secret".to_vec()),
                encryption_algorithm: None,
            }
            .to_extension(),
            user_token_signature: SignatureData::default(),
        }));
    }

    #[test]
    fn identity_token_round_trip() {
        let token = UserIdentityToken::Anonymous {
            policy_id: Some("anonymous".into()),
        };
        let ext = token.to_extension();
        assert_eq!(UserIdentityToken::from_extension(&ext).unwrap(), token);

        // A null extension object is anonymous
        let ext = ExtensionObject::null();
        assert_eq!(
            UserIdentityToken::from_extension(&ext).unwrap(),
            UserIdentityToken::Anonymous { policy_id: None }
        );

        // An unknown token type is rejected
        let bogus = ExtensionObject::new(NodeId::numeric(0, 999), vec![]);
        assert_eq!(
            UserIdentityToken::from_extension(&bogus),
            Err(StatusCode::BAD_IDENTITY_TOKEN_INVALID)
        );
    }

    #[test]
    fn publish_round_trip() {
        let notification = DataChangeNotification {
            monitored_items: Some(vec![MonitoredItemNotification {
                client_handle: 5,
                value: DataValue::new(Variant::Double(1.25)),
            }]),
            diagnostic_infos: None,
        };
        round_trip(Message::PublishResponse(PublishResponse {
            response_header: ResponseHeader::for_request(9, StatusCode::GOOD, 0),
            subscription_id: 1,
            available_sequence_numbers: Some(vec![1, 2]),
            more_notifications: false,
            notification_message: NotificationMessage {
                sequence_number: 2,
                publish_time: 0,
                notification_data: Some(vec![notification.to_extension()]),
            },
            results: Some(vec![StatusCode::GOOD]),
            diagnostic_infos: None,
        }));
    }

    #[test]
    fn data_change_notification_round_trip() {
        let dcn = DataChangeNotification {
            monitored_items: Some(vec![MonitoredItemNotification {
                client_handle: 11,
                value: DataValue::new(Variant::Int32(3)),
            }]),
            diagnostic_infos: None,
        };
        let ext = dcn.to_extension();
        assert_eq!(ext.type_id, NodeId::numeric(0, ids::DATA_CHANGE_NOTIFICATION));
        assert_eq!(DataChangeNotification::from_extension(&ext).unwrap(), dcn);
    }

    #[test]
    fn browse_round_trip() {
        round_trip(Message::BrowseRequest(BrowseRequest {
            request_header: header(4),
            view: ViewDescription::default(),
            requested_max_references_per_node: 100,
            nodes_to_browse: Some(vec![BrowseDescription {
                node_id: NodeId::numeric(0, 85),
                browse_direction: browse_direction::FORWARD,
                reference_type_id: NodeId::numeric(0, 33),
                include_subtypes: true,
                node_class_mask: 0,
                result_mask: 0x3F,
            }]),
        }));
    }

    #[test]
    fn unknown_encoding_id_is_service_unsupported() {
        let mut body = Vec::new();
        NodeId::numeric(0, 99_999).encode(&mut body);
        let err = Message::decode_body(&mut body.as_slice()).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_SERVICE_UNSUPPORTED);
    }

    #[test]
    fn service_fault_round_trip() {
        round_trip(Message::ServiceFault(ServiceFault {
            response_header: ResponseHeader::for_request(
                12,
                StatusCode::BAD_SERVICE_UNSUPPORTED,
                0,
            ),
        }));
    }
}
