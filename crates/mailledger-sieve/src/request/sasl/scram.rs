//! SCRAM mechanisms (RFC 5802, RFC 7677).
//!
//! Channel binding is not supported, so the GS2 header is always `n,,` or
//! `n,a=<authzid>,`. Names are escaped but not SASLprep-normalized.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use super::{Credentials, Mechanism};
use crate::command::{RequestBuilder, decode_base64, encode_base64};
use crate::types::Response;
use crate::{Error, Result};

const NONCE_BYTES: usize = 24;

/// Highest PBKDF2 iteration count accepted from a server.
const MAX_ITERATIONS: u32 = 100_000;

/// Hash function behind a SCRAM mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScramHash {
    /// SHA-1 (SCRAM-SHA-1).
    Sha1,
    /// SHA-256 (SCRAM-SHA-256).
    Sha256,
    /// SHA-512 (SCRAM-SHA-512).
    Sha512,
}

impl ScramHash {
    pub(super) fn for_mechanism(mechanism: Mechanism) -> Result<Self> {
        match mechanism {
            Mechanism::ScramSha1 => Ok(Self::Sha1),
            Mechanism::ScramSha256 => Ok(Self::Sha256),
            Mechanism::ScramSha512 => Ok(Self::Sha512),
            other => Err(Error::Auth(format!("{other} is not a SCRAM mechanism"))),
        }
    }

    /// Returns the SASL mechanism using this hash.
    #[must_use]
    pub const fn mechanism(self) -> Mechanism {
        match self {
            Self::Sha1 => Mechanism::ScramSha1,
            Self::Sha256 => Mechanism::ScramSha256,
            Self::Sha512 => Mechanism::ScramSha512,
        }
    }

    const fn output_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Sha1 => mac::<Hmac<Sha1>>(key, data),
            Self::Sha256 => mac::<Hmac<Sha256>>(key, data),
            Self::Sha512 => mac::<Hmac<Sha512>>(key, data),
        }
    }

    fn salt_password(self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        let mut salted = vec![0u8; self.output_len()];
        match self {
            Self::Sha1 => pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut salted),
            Self::Sha256 => pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut salted),
            Self::Sha512 => pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut salted),
        }
        salted
    }
}

fn mac<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| Error::Auth("invalid HMAC key length".to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Generates a random printable client nonce.
pub(super) fn generate_nonce() -> String {
    let random_bytes: Vec<u8> = (0..NONCE_BYTES)
        .map(|_| rand::thread_rng().r#gen::<u8>())
        .collect();
    encode_base64(&random_bytes)
}

/// Escapes a `saslname`: `=` becomes `=3D` and `,` becomes `=2C`.
fn escape_name(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for server-first-message.
    ServerFirst,
    /// Client proof sent, waiting for the server signature.
    ServerFinal,
    /// Server signature checked.
    Verified,
}

/// Two-round SCRAM exchange.
#[derive(Clone)]
pub struct Scram {
    hash: ScramHash,
    password: String,
    gs2_header: String,
    client_first_bare: String,
    client_nonce: String,
    server_signature: Option<Vec<u8>>,
    state: State,
}

impl Scram {
    pub(super) fn new(
        hash: ScramHash,
        credentials: &Credentials,
        password: &str,
        client_nonce: String,
    ) -> Self {
        let gs2_header = match credentials.authorization() {
            "" => "n,,".to_string(),
            authorization => format!("n,a={},", escape_name(authorization)),
        };
        let client_first_bare = format!(
            "n={},r={client_nonce}",
            escape_name(&credentials.username)
        );

        Self {
            hash,
            password: password.to_string(),
            gs2_header,
            client_first_bare,
            client_nonce,
            server_signature: None,
            state: State::ServerFirst,
        }
    }

    pub(super) const fn mechanism(&self) -> Mechanism {
        self.hash.mechanism()
    }

    /// Returns the client-first-message.
    pub(super) fn initial_response(&self) -> Vec<u8> {
        format!("{}{}", self.gs2_header, self.client_first_bare).into_bytes()
    }

    pub(super) fn challenge(&mut self, challenge: &str) -> Result<Vec<u8>> {
        match self.state {
            State::ServerFirst => {
                let server_first = decode_message(challenge)?;
                let client_final = self.client_final(&server_first)?;
                self.state = State::ServerFinal;
                Ok(RequestBuilder::continuation()
                    .add_quoted_base64(client_final.as_bytes())
                    .into_bytes())
            }
            State::ServerFinal => {
                self.verify(challenge)?;
                self.state = State::Verified;
                // The signature arrived as a bare line; the server waits for an empty reply.
                Ok(RequestBuilder::continuation()
                    .add_quoted_string("")
                    .into_bytes())
            }
            State::Verified => Err(Error::Auth(
                "unexpected challenge after SCRAM verification".to_string(),
            )),
        }
    }

    pub(super) fn finish(&mut self, response: Response) -> Result<Response> {
        match self.state {
            State::Verified => Ok(response),
            State::ServerFinal => {
                let Some(verifier) = response.sasl().map(str::to_string) else {
                    return Err(Error::Auth("server signature missing".to_string()));
                };
                self.verify(&verifier)?;
                self.state = State::Verified;
                Ok(response)
            }
            State::ServerFirst => Err(Error::Auth(
                "server completed SCRAM before the client proof".to_string(),
            )),
        }
    }

    /// Builds client-final-message from server-first-message.
    fn client_final(&mut self, server_first: &str) -> Result<String> {
        let mut fields = server_first.split(',').peekable();
        if fields.peek().is_some_and(|f| f.starts_with("m=")) {
            fields.next();
        }

        let nonce = attribute(fields.next(), "r=")?;
        let salt = attribute(fields.next(), "s=")?;
        let iterations = attribute(fields.next(), "i=")?;

        if nonce.len() <= self.client_nonce.len() || !nonce.starts_with(&self.client_nonce) {
            return Err(Error::Auth("server nonce does not extend client nonce".to_string()));
        }

        let salt = decode_base64(salt).ok_or_else(|| Error::Auth("invalid SCRAM salt".to_string()))?;
        let iterations: u32 = iterations
            .parse()
            .ok()
            .filter(|i| *i > 0)
            .ok_or_else(|| Error::Auth("invalid SCRAM iteration count".to_string()))?;
        if iterations > MAX_ITERATIONS {
            return Err(Error::Auth(format!(
                "SCRAM iteration count {iterations} exceeds {MAX_ITERATIONS}"
            )));
        }

        let salted = self
            .hash
            .salt_password(self.password.as_bytes(), &salt, iterations);
        let client_key = self.hash.hmac(&salted, b"Client Key")?;
        let stored_key = self.hash.digest(&client_key);

        let without_proof = format!("c={},r={nonce}", encode_base64(self.gs2_header.as_bytes()));
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare);

        let client_signature = self.hash.hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(key, signature)| key ^ signature)
            .collect();

        let server_key = self.hash.hmac(&salted, b"Server Key")?;
        self.server_signature = Some(self.hash.hmac(&server_key, auth_message.as_bytes())?);

        Ok(format!("{without_proof},p={}", encode_base64(&proof)))
    }

    /// Checks server-final-message (`v=` or `e=`).
    fn verify(&self, server_final: &str) -> Result<()> {
        let message = decode_message(server_final)?;
        let first = message.split(',').next().unwrap_or_default();

        if let Some(error) = first.strip_prefix("e=") {
            return Err(Error::Auth(format!("server rejected SCRAM proof: {error}")));
        }

        let verifier = first
            .strip_prefix("v=")
            .and_then(decode_base64)
            .ok_or_else(|| Error::Auth("malformed SCRAM server signature".to_string()))?;

        match &self.server_signature {
            Some(expected) if *expected == verifier => Ok(()),
            _ => Err(Error::Auth("SCRAM server signature mismatch".to_string())),
        }
    }
}

impl std::fmt::Debug for Scram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scram")
            .field("hash", &self.hash)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn decode_message(data: &str) -> Result<String> {
    decode_base64(data)
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| Error::Auth("malformed SCRAM message".to_string()))
}

fn attribute<'a>(field: Option<&'a str>, prefix: &str) -> Result<&'a str> {
    field
        .and_then(|f| f.strip_prefix(prefix))
        .ok_or_else(|| Error::Auth(format!("SCRAM message lacks {prefix}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::types::{ResponseCode, Status};

    const SHA1_NONCE: &str = "fyko+d2lbbFgONRv9qkxdawL";
    const SHA1_SERVER_FIRST: &str =
        "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";
    const SHA1_CLIENT_FINAL: &str =
        "c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts=";
    const SHA1_SERVER_FINAL: &str = "v=rmF9pqV8S7suAoZWja4dJRkFsKQ=";

    fn sha1() -> Scram {
        Scram::new(
            ScramHash::Sha1,
            &Credentials::new("user", "pencil"),
            "pencil",
            SHA1_NONCE.to_string(),
        )
    }

    fn quoted(message: &str) -> Vec<u8> {
        format!("\"{}\"\r\n", encode_base64(message.as_bytes())).into_bytes()
    }

    #[test]
    fn test_client_first() {
        assert_eq!(
            sha1().initial_response(),
            b"n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL"
        );
    }

    #[test]
    fn test_sha1_exchange_with_bare_verifier() {
        let mut scram = sha1();
        let reply = scram.challenge(&encode_base64(SHA1_SERVER_FIRST.as_bytes())).unwrap();
        assert_eq!(reply, quoted(SHA1_CLIENT_FINAL));

        let reply = scram.challenge(&encode_base64(SHA1_SERVER_FINAL.as_bytes())).unwrap();
        assert_eq!(reply, b"\"\"\r\n");

        assert!(scram.finish(Response::new(Status::Ok)).is_ok());
    }

    #[test]
    fn test_sha1_verifier_in_response_code() {
        let mut scram = sha1();
        scram.challenge(&encode_base64(SHA1_SERVER_FIRST.as_bytes())).unwrap();

        let response = Response {
            status: Status::Ok,
            code: Some(ResponseCode::Sasl(encode_base64(SHA1_SERVER_FINAL.as_bytes()))),
            message: None,
        };
        assert!(scram.finish(response).is_ok());
    }

    #[test]
    fn test_missing_verifier_fails() {
        let mut scram = sha1();
        scram.challenge(&encode_base64(SHA1_SERVER_FIRST.as_bytes())).unwrap();
        assert!(matches!(
            scram.finish(Response::new(Status::Ok)),
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn test_wrong_verifier_fails() {
        let mut scram = sha1();
        scram.challenge(&encode_base64(SHA1_SERVER_FIRST.as_bytes())).unwrap();
        let err = scram.challenge(&encode_base64(b"v=AAAA")).unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m.contains("mismatch")));
    }

    #[test]
    fn test_server_error_field() {
        let mut scram = sha1();
        scram.challenge(&encode_base64(SHA1_SERVER_FIRST.as_bytes())).unwrap();
        let err = scram.challenge("ZT1pbnZhbGlkLXByb29m").unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m.contains("invalid-proof")));
    }

    #[test]
    fn test_extension_field_is_skipped() {
        let mut scram = sha1();
        let server_first = format!("m=ext,{SHA1_SERVER_FIRST}");
        let client_final = scram.client_final(&server_first).unwrap();
        assert!(client_final.starts_with("c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p="));
    }

    #[test]
    fn test_foreign_nonce_is_rejected() {
        let mut scram = sha1();
        let err = scram
            .challenge(&encode_base64(b"r=attacker,s=QSXCR+Q6sek8bf92,i=4096"))
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(scram.state, State::ServerFirst);
    }

    #[test]
    fn test_iteration_count_is_bounded() {
        let mut scram = sha1();
        let server_first = format!(
            "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i={}",
            MAX_ITERATIONS + 1
        );
        let err = scram.client_final(&server_first).unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m.contains("exceeds")));

        let err = scram
            .client_final("r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=0")
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn test_sha256_exchange() {
        let mut scram = Scram::new(
            ScramHash::Sha256,
            &Credentials::new("user", "pencil"),
            "pencil",
            "rOprNGfwEbeRWgbNEkqO".to_string(),
        );
        let server_first = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

        let reply = scram.challenge(&encode_base64(server_first.as_bytes())).unwrap();
        assert_eq!(
            reply,
            quoted(
                "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
            )
        );

        scram
            .challenge(&encode_base64(b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4="))
            .unwrap();
    }

    #[test]
    fn test_authorization_is_escaped() {
        let credentials = Credentials::new("us,er", "pencil").with_authorization("ad=min");
        let scram = Scram::new(ScramHash::Sha512, &credentials, "pencil", "abc".to_string());
        assert_eq!(scram.initial_response(), b"n,a=ad=3Dmin,n=us=2Cer,r=abc");
    }

    #[test]
    fn test_generated_nonce_is_printable() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(!nonce.contains(','));
        assert_ne!(nonce, generate_nonce());
    }
}
