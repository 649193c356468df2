//! OPC UA status codes.
//!
//! A `StatusCode` is the 32-bit wire value defined by OPC UA Part 4. Only the
//! codes the toolkit actually emits or inspects are named here; anything else
//! round-trips through the raw value untouched.

use std::fmt;

/// A raw OPC UA status code.
///
/// The top two bits carry the severity: `00` good, `01` uncertain, `10` bad.
/// The sub-code (bits 16..28) identifies the condition; low bits are flags
/// the toolkit neither sets nor reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);

    // Transport
    pub const BAD_COMMUNICATION_ERROR: StatusCode = StatusCode(0x8005_0000);
    pub const BAD_TCP_MESSAGE_TYPE_INVALID: StatusCode = StatusCode(0x807E_0000);
    pub const BAD_TCP_MESSAGE_TOO_LARGE: StatusCode = StatusCode(0x8080_0000);
    pub const BAD_TCP_ENDPOINT_URL_INVALID: StatusCode = StatusCode(0x8083_0000);
    pub const BAD_CONNECTION_CLOSED: StatusCode = StatusCode(0x80AE_0000);
    pub const BAD_PROTOCOL_VERSION_UNSUPPORTED: StatusCode = StatusCode(0x80BE_0000);

    // Channel
    pub const BAD_TCP_SECURE_CHANNEL_UNKNOWN: StatusCode = StatusCode(0x807F_0000);
    pub const BAD_SECURE_CHANNEL_TOKEN_UNKNOWN: StatusCode = StatusCode(0x8087_0000);
    pub const BAD_SECURE_CHANNEL_CLOSED: StatusCode = StatusCode(0x8086_0000);
    pub const BAD_SECURITY_CHECKS_FAILED: StatusCode = StatusCode(0x8013_0000);
    pub const BAD_SECURITY_POLICY_REJECTED: StatusCode = StatusCode(0x8055_0000);
    pub const BAD_NONCE_INVALID: StatusCode = StatusCode(0x8024_0000);

    // Session
    pub const BAD_SESSION_ID_INVALID: StatusCode = StatusCode(0x8025_0000);
    pub const BAD_SESSION_CLOSED: StatusCode = StatusCode(0x8026_0000);
    pub const BAD_SESSION_NOT_ACTIVATED: StatusCode = StatusCode(0x8027_0000);
    pub const BAD_TOO_MANY_SESSIONS: StatusCode = StatusCode(0x80B6_0000);

    // Identity
    pub const BAD_IDENTITY_TOKEN_INVALID: StatusCode = StatusCode(0x8020_0000);
    pub const BAD_IDENTITY_TOKEN_REJECTED: StatusCode = StatusCode(0x8021_0000);

    // Authorization
    pub const BAD_USER_ACCESS_DENIED: StatusCode = StatusCode(0x801F_0000);
    pub const BAD_NOT_READABLE: StatusCode = StatusCode(0x803A_0000);
    pub const BAD_NOT_WRITABLE: StatusCode = StatusCode(0x803B_0000);

    // Semantic
    pub const BAD_NODE_ID_INVALID: StatusCode = StatusCode(0x8033_0000);
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    pub const BAD_ATTRIBUTE_ID_INVALID: StatusCode = StatusCode(0x8035_0000);
    pub const BAD_INDEX_RANGE_INVALID: StatusCode = StatusCode(0x8036_0000);
    pub const BAD_INDEX_RANGE_NO_DATA: StatusCode = StatusCode(0x8037_0000);
    pub const BAD_TYPE_MISMATCH: StatusCode = StatusCode(0x8074_0000);
    pub const BAD_WRITE_NOT_SUPPORTED: StatusCode = StatusCode(0x8073_0000);
    pub const BAD_OUT_OF_RANGE: StatusCode = StatusCode(0x803C_0000);
    pub const BAD_METHOD_INVALID: StatusCode = StatusCode(0x8075_0000);
    pub const BAD_NOT_SUPPORTED: StatusCode = StatusCode(0x803D_0000);
    pub const BAD_VIEW_ID_UNKNOWN: StatusCode = StatusCode(0x806B_0000);
    pub const BAD_REFERENCE_TYPE_ID_INVALID: StatusCode = StatusCode(0x806C_0000);
    pub const BAD_BROWSE_DIRECTION_INVALID: StatusCode = StatusCode(0x806D_0000);

    // Service
    pub const BAD_SERVICE_UNSUPPORTED: StatusCode = StatusCode(0x800B_0000);
    pub const BAD_NOTHING_TO_DO: StatusCode = StatusCode(0x800F_0000);
    pub const BAD_REQUEST_HEADER_INVALID: StatusCode = StatusCode(0x802A_0000);

    // Resource
    pub const BAD_OUT_OF_MEMORY: StatusCode = StatusCode(0x8003_0000);
    pub const BAD_RESOURCE_UNAVAILABLE: StatusCode = StatusCode(0x8004_0000);
    pub const BAD_TOO_MANY_OPERATIONS: StatusCode = StatusCode(0x8010_0000);
    pub const BAD_MAX_CONNECTIONS_REACHED: StatusCode = StatusCode(0x80B7_0000);
    pub const BAD_TCP_NOT_ENOUGH_RESOURCES: StatusCode = StatusCode(0x8081_0000);

    // Encoding
    pub const BAD_ENCODING_ERROR: StatusCode = StatusCode(0x8006_0000);
    pub const BAD_DECODING_ERROR: StatusCode = StatusCode(0x8007_0000);
    pub const BAD_ENCODING_LIMITS_EXCEEDED: StatusCode = StatusCode(0x8008_0000);
    pub const BAD_REQUEST_TOO_LARGE: StatusCode = StatusCode(0x80B8_0000);

    // Timeout
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    pub const BAD_REQUEST_TIMEOUT: StatusCode = StatusCode(0x8085_0000);

    // Subscription
    pub const BAD_SUBSCRIPTION_ID_INVALID: StatusCode = StatusCode(0x8028_0000);
    pub const BAD_TOO_MANY_SUBSCRIPTIONS: StatusCode = StatusCode(0x8077_0000);
    pub const BAD_TOO_MANY_PUBLISH_REQUESTS: StatusCode = StatusCode(0x8078_0000);
    pub const BAD_NO_SUBSCRIPTION: StatusCode = StatusCode(0x8079_0000);
    pub const BAD_SEQUENCE_NUMBER_UNKNOWN: StatusCode = StatusCode(0x807A_0000);
    pub const BAD_MESSAGE_NOT_AVAILABLE: StatusCode = StatusCode(0x807B_0000);

    // Internal
    pub const BAD_INTERNAL_ERROR: StatusCode = StatusCode(0x8002_0000);
    pub const BAD_UNEXPECTED_ERROR: StatusCode = StatusCode(0x8001_0000);
    pub const BAD_INVALID_STATE: StatusCode = StatusCode(0x80AF_0000);
    pub const BAD_INVALID_ARGUMENT: StatusCode = StatusCode(0x80AB_0000);

    pub fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    pub fn is_uncertain(self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// The name of a known code, or `None` for codes the toolkit does not
    /// define. Low-order flag bits are ignored for the lookup.
    pub fn name(self) -> Option<&'static str> {
        let named = StatusCode(self.0 & 0xFFFF_0000);
        Some(match named {
            StatusCode::GOOD => "Good",
            StatusCode::BAD_COMMUNICATION_ERROR => "BadCommunicationError",
            StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID => "BadTcpMessageTypeInvalid",
            StatusCode::BAD_TCP_MESSAGE_TOO_LARGE => "BadTcpMessageTooLarge",
            StatusCode::BAD_TCP_ENDPOINT_URL_INVALID => "BadTcpEndpointUrlInvalid",
            StatusCode::BAD_CONNECTION_CLOSED => "BadConnectionClosed",
            StatusCode::BAD_PROTOCOL_VERSION_UNSUPPORTED => "BadProtocolVersionUnsupported",
            StatusCode::BAD_TCP_SECURE_CHANNEL_UNKNOWN => "BadTcpSecureChannelUnknown",
            StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN => "BadSecureChannelTokenUnknown",
            StatusCode::BAD_SECURE_CHANNEL_CLOSED => "BadSecureChannelClosed",
            StatusCode::BAD_SECURITY_CHECKS_FAILED => "BadSecurityChecksFailed",
            StatusCode::BAD_SECURITY_POLICY_REJECTED => "BadSecurityPolicyRejected",
            StatusCode::BAD_NONCE_INVALID => "BadNonceInvalid",
            StatusCode::BAD_SESSION_ID_INVALID => "BadSessionIdInvalid",
            StatusCode::BAD_SESSION_CLOSED => "BadSessionClosed",
            StatusCode::BAD_SESSION_NOT_ACTIVATED => "BadSessionNotActivated",
            StatusCode::BAD_TOO_MANY_SESSIONS => "BadTooManySessions",
            StatusCode::BAD_IDENTITY_TOKEN_INVALID => "BadIdentityTokenInvalid",
            StatusCode::BAD_IDENTITY_TOKEN_REJECTED => "BadIdentityTokenRejected",
            StatusCode::BAD_USER_ACCESS_DENIED => "BadUserAccessDenied",
            StatusCode::BAD_NOT_READABLE => "BadNotReadable",
            StatusCode::BAD_NOT_WRITABLE => "BadNotWritable",
            StatusCode::BAD_NODE_ID_INVALID => "BadNodeIdInvalid",
            StatusCode::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            StatusCode::BAD_ATTRIBUTE_ID_INVALID => "BadAttributeIdInvalid",
            StatusCode::BAD_INDEX_RANGE_INVALID => "BadIndexRangeInvalid",
            StatusCode::BAD_INDEX_RANGE_NO_DATA => "BadIndexRangeNoData",
            StatusCode::BAD_TYPE_MISMATCH => "BadTypeMismatch",
            StatusCode::BAD_WRITE_NOT_SUPPORTED => "BadWriteNotSupported",
            StatusCode::BAD_OUT_OF_RANGE => "BadOutOfRange",
            StatusCode::BAD_METHOD_INVALID => "BadMethodInvalid",
            StatusCode::BAD_NOT_SUPPORTED => "BadNotSupported",
            StatusCode::BAD_VIEW_ID_UNKNOWN => "BadViewIdUnknown",
            StatusCode::BAD_REFERENCE_TYPE_ID_INVALID => "BadReferenceTypeIdInvalid",
            StatusCode::BAD_BROWSE_DIRECTION_INVALID => "BadBrowseDirectionInvalid",
            StatusCode::BAD_SERVICE_UNSUPPORTED => "BadServiceUnsupported",
            StatusCode::BAD_NOTHING_TO_DO => "BadNothingToDo",
            StatusCode::BAD_REQUEST_HEADER_INVALID => "BadRequestHeaderInvalid",
            StatusCode::BAD_OUT_OF_MEMORY => "BadOutOfMemory",
            StatusCode::BAD_RESOURCE_UNAVAILABLE => "BadResourceUnavailable",
            StatusCode::BAD_TOO_MANY_OPERATIONS => "BadTooManyOperations",
            StatusCode::BAD_MAX_CONNECTIONS_REACHED => "BadMaxConnectionsReached",
            StatusCode::BAD_TCP_NOT_ENOUGH_RESOURCES => "BadTcpNotEnoughResources",
            StatusCode::BAD_ENCODING_ERROR => "BadEncodingError",
            StatusCode::BAD_DECODING_ERROR => "BadDecodingError",
            StatusCode::BAD_ENCODING_LIMITS_EXCEEDED => "BadEncodingLimitsExceeded",
            StatusCode::BAD_REQUEST_TOO_LARGE => "BadRequestTooLarge",
            StatusCode::BAD_TIMEOUT => "BadTimeout",
            StatusCode::BAD_REQUEST_TIMEOUT => "BadRequestTimeout",
            StatusCode::BAD_SUBSCRIPTION_ID_INVALID => "BadSubscriptionIdInvalid",
            StatusCode::BAD_TOO_MANY_SUBSCRIPTIONS => "BadTooManySubscriptions",
            StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS => "BadTooManyPublishRequests",
            StatusCode::BAD_NO_SUBSCRIPTION => "BadNoSubscription",
            StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN => "BadSequenceNumberUnknown",
            StatusCode::BAD_MESSAGE_NOT_AVAILABLE => "BadMessageNotAvailable",
            StatusCode::BAD_INTERNAL_ERROR => "BadInternalError",
            StatusCode::BAD_UNEXPECTED_ERROR => "BadUnexpectedError",
            StatusCode::BAD_INVALID_STATE => "BadInvalidState",
            StatusCode::BAD_INVALID_ARGUMENT => "BadInvalidArgument",
            _ => return None,
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

impl From<u32> for StatusCode {
    fn from(raw: u32) -> Self {
        StatusCode(raw)
    }
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> u32 {
        code.0
    }
}
