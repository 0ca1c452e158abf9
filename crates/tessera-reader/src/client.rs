//! Client session against one key-issuance server.
//!
//! Works over any authenticated stream; the TCP constructor is a
//! convenience for deployments that terminate TLS in front of the socket.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use tessera_authority::{read_frame, write_frame, Request, Response};
use tessera_core::{AuthorityId, ProcessInstanceId, ReaderGid};
use tessera_policy::PartialKey;
use tessera_zk::{Proof, PublicSignals};

use crate::error::{ReaderError, ReaderResult};

pub struct AuthoritySession<S: Read + Write> {
    stream: S,
    authority_id: AuthorityId,
}

impl AuthoritySession<TcpStream> {
    pub fn connect<A: ToSocketAddrs>(authority_id: AuthorityId, addr: A) -> ReaderResult<Self> {
        let stream = TcpStream::connect(addr)?;
        tracing::debug!(authority = %authority_id, "connected to key-issuance server");
        Ok(Self::new(stream, authority_id))
    }
}

impl<S: Read + Write> AuthoritySession<S> {
    pub fn new(stream: S, authority_id: AuthorityId) -> Self {
        Self {
            stream,
            authority_id,
        }
    }

    fn exchange(&mut self, request: &Request) -> ReaderResult<Response> {
        write_frame(&mut self.stream, &request.to_wire(self.authority_id))?;
        let raw = read_frame(&mut self.stream)?.ok_or_else(|| {
            ReaderError::Rejected("server closed the connection without responding".into())
        })?;
        Ok(Response::parse(&raw)?)
    }

    fn expect_partial_key(&mut self, request: &Request) -> ReaderResult<PartialKey> {
        match self.exchange(request)? {
            Response::PartialKey(key) => Ok(key),
            Response::Error(reason) => Err(ReaderError::Rejected(reason)),
            other => Err(ReaderError::Rejected(format!(
                "unexpected response: {other:?}"
            ))),
        }
    }

    /// Legacy path, step one: obtain the number to sign.
    pub fn start_handshake(
        &mut self,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
    ) -> ReaderResult<u64> {
        let request = Request::StartHandshake {
            process_instance,
            reader: reader.clone(),
        };
        match self.exchange(&request)? {
            Response::NumberToSign(nonce) => Ok(nonce),
            Response::Error(reason) => Err(ReaderError::Rejected(reason)),
            other => Err(ReaderError::Rejected(format!(
                "unexpected response: {other:?}"
            ))),
        }
    }

    /// Legacy path, step two: exchange the signed nonce for a partial key.
    pub fn request_key_signed(
        &mut self,
        gid: &ReaderGid,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
        signature: [u8; 64],
    ) -> ReaderResult<PartialKey> {
        self.expect_partial_key(&Request::GenerateKey {
            gid: gid.clone(),
            process_instance,
            reader: reader.clone(),
            signature,
        })
    }

    /// Proof-gated path: exchange a proof of attribute for a partial key.
    pub fn request_key_with_proof(
        &mut self,
        gid: &ReaderGid,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
        proof: Proof,
        signals: PublicSignals,
    ) -> ReaderResult<PartialKey> {
        self.expect_partial_key(&Request::ZkGenerateKey {
            gid: gid.clone(),
            process_instance,
            reader: reader.clone(),
            proof,
            signals,
        })
    }

    /// End the session politely.
    pub fn disconnect(mut self) -> ReaderResult<()> {
        write_frame(&mut self.stream, &Request::Disconnect.to_wire(self.authority_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Scripted stream: reads come from `input`, writes land in `output`.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn scripted(responses: &[Response]) -> Scripted {
        let mut input = Vec::new();
        for response in responses {
            write_frame(&mut input, &response.to_wire()).unwrap();
        }
        Scripted {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }

    #[test]
    fn test_start_handshake_parses_nonce() {
        let stream = scripted(&[Response::NumberToSign(9001)]);
        let mut session = AuthoritySession::new(stream, AuthorityId(1));
        let nonce = session
            .start_handshake(ProcessInstanceId(1), &ReaderGid::new("r"))
            .unwrap();
        assert_eq!(nonce, 9001);
    }

    #[test]
    fn test_error_response_surfaces_reason() {
        let stream = scripted(&[Response::Error("invalid proof".into())]);
        let mut session = AuthoritySession::new(stream, AuthorityId(1));
        let err = session
            .request_key_with_proof(
                &ReaderGid::new("g"),
                ProcessInstanceId(1),
                &ReaderGid::new("r"),
                Proof(vec![0]),
                PublicSignals(vec![]),
            )
            .unwrap_err();
        match err {
            ReaderError::Rejected(reason) => assert_eq!(reason, "invalid proof"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_closed_stream_is_rejection() {
        let stream = scripted(&[]);
        let mut session = AuthoritySession::new(stream, AuthorityId(1));
        let err = session
            .start_handshake(ProcessInstanceId(1), &ReaderGid::new("r"))
            .unwrap_err();
        assert!(matches!(err, ReaderError::Rejected(_)));
    }

    #[test]
    fn test_disconnect_sends_sentinel() {
        let stream = scripted(&[]);
        let session = AuthoritySession::new(stream, AuthorityId(1));
        // The sentinel is written even though nothing will read it here
        session.disconnect().unwrap();
    }
}
