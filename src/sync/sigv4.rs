//! AWS Signature Version 4
//!
//! Signs GET requests against the AWS Query APIs (Auto Scaling, EC2).
//! Only the `host` and `x-amz-date` headers (plus the session token, when
//! present) are signed; the payload of a GET is always empty.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Static or temporary AWS credentials
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A query string plus the headers that must accompany it
#[derive(Debug, Clone)]
pub struct SignedQuery {
    /// Canonical, already percent-encoded query string
    pub query: String,
    /// Headers to send with the request (excluding `host`)
    pub headers: Vec<(&'static str, String)>,
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Derive the per-day signing key
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Percent-encode and sort query parameters (RFC 3986 unreserved set kept)
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    encoded.sort();

    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign a GET request to `https://{host}/?{params}`
pub fn sign_query(
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    host: &str,
    params: &[(String, String)],
    now: DateTime<Utc>,
) -> SignedQuery {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let query = canonical_query(params);

    let mut canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
    let mut signed_headers = String::from("host;x-amz-date");
    if let Some(token) = &credentials.session_token {
        canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
        signed_headers.push_str(";x-amz-security-token");
    }

    let canonical_request = format!(
        "GET\n/\n{}\n{}\n{}\n{}",
        query,
        canonical_headers,
        signed_headers,
        sha256_hex(b"")
    );

    let scope = format!("{}/{}/{}/aws4_request", date, region, service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(&credentials.secret_access_key, &date, region, service);
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, credentials.access_key_id, scope, signed_headers, signature
    );

    let mut headers = vec![("x-amz-date", amz_date), ("authorization", authorization)];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token", token.clone()));
    }

    SignedQuery { query, headers }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn credentials(session_token: Option<&str>) -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: session_token.map(str::to_string),
        }
    }

    #[test]
    fn test_signing_key_matches_aws_example() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );

        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_canonical_query_sorted_and_encoded() {
        let query = canonical_query(&params(&[
            ("Version", "2011-01-01"),
            ("Action", "DescribeAutoScalingGroups"),
            ("AutoScalingGroupNames.member.1", "web asg/blue"),
        ]));

        assert_eq!(
            query,
            "Action=DescribeAutoScalingGroups&AutoScalingGroupNames.member.1=web%20asg%2Fblue&Version=2011-01-01"
        );
    }

    #[test]
    fn test_authorization_header_layout() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 5).unwrap();
        let signed = sign_query(
            &credentials(None),
            "eu-west-1",
            "ec2",
            "ec2.eu-west-1.amazonaws.com",
            &params(&[("Action", "DescribeInstances")]),
            now,
        );

        let headers: std::collections::HashMap<_, _> = signed.headers.iter().cloned().collect();
        assert_eq!(headers["x-amz-date"], "20240309T123005Z");
        assert!(!headers.contains_key("x-amz-security-token"));

        let auth = &headers["authorization"];
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240309/eu-west-1/ec2/aws4_request, "
        ));
        assert!(auth.contains("SignedHeaders=host;x-amz-date, "));

        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    // aws-sig-v4-test-suite: get-vanilla-query-order-key-case
    #[test]
    fn test_signature_matches_aws_test_suite() {
        let now = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();
        let signed = sign_query(
            &credentials(None),
            "us-east-1",
            "service",
            "example.amazonaws.com",
            &params(&[("Param2", "value2"), ("Param1", "value1")]),
            now,
        );

        assert_eq!(signed.query, "Param1=value1&Param2=value2");
        assert_eq!(
            signed.headers[1],
            (
                "authorization",
                "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
                 SignedHeaders=host;x-amz-date, \
                 Signature=b97d918cfa904a5beff61c982a1b6f458b799221646efd99d3219ec94cdf2500"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_session_token_is_signed() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 5).unwrap();
        let host = "autoscaling.us-east-1.amazonaws.com";
        let query = params(&[("Action", "DescribeAutoScalingGroups")]);

        let plain = sign_query(&credentials(None), "us-east-1", "autoscaling", host, &query, now);
        let with_token = sign_query(
            &credentials(Some("session")),
            "us-east-1",
            "autoscaling",
            host,
            &query,
            now,
        );

        let auth = &with_token.headers[1].1;
        assert!(auth.contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
        assert_ne!(plain.headers[1].1, with_token.headers[1].1);
        assert_eq!(with_token.headers[2], ("x-amz-security-token", "session".to_string()));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 5).unwrap();
        let query = params(&[("Action", "DescribeInstances"), ("InstanceId.1", "i-1")]);
        let a = sign_query(&credentials(None), "us-east-1", "ec2", "ec2.us-east-1.amazonaws.com", &query, now);
        let b = sign_query(&credentials(None), "us-east-1", "ec2", "ec2.us-east-1.amazonaws.com", &query, now);

        assert_eq!(a.headers, b.headers);
        assert_eq!(a.query, b.query);
    }
}
