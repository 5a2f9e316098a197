//! In-process mock server speaking canned RESP over a local socket.
#![allow(dead_code)]

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Binds a listener on an ephemeral port and returns it with a matching
/// connection URL.
pub async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, format!("redis://127.0.0.1:{}/", port))
}

/// Formats one RESP command frame the way a client sends it.
pub fn cmd(args: &[&[u8]]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Concatenates command frames into one pipelined request.
pub fn pipeline(commands: &[&[&[u8]]]) -> Vec<u8> {
    let mut out = Vec::new();
    for command in commands {
        out.extend_from_slice(&cmd(command));
    }
    out
}

/// Reads exactly the expected request bytes and asserts them.
pub async fn expect_request(server: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(
        buf,
        expected,
        "request mismatch: got {:?}, want {:?}",
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

/// Writes canned reply bytes.
pub async fn reply(server: &mut TcpStream, data: &[u8]) {
    server.write_all(data).await.unwrap();
}
