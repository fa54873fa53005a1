//! Blob exchange over TCP.

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread,
    time::Duration,
};

use bytes::Bytes;
use reflector::{
    peer::{
        blob_hash, AvailabilityResponse, BlobResponse, MemoryBlobStore, PaymentRateResponse,
        RequestFramer, Server, LBRYCRD_ADDRESS, RATE_ACCEPTED, RATE_TOO_LOW,
    },
    Id,
};

fn start_server(store: MemoryBlobStore) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();

    let server = Server::new(Arc::new(store));
    thread::spawn(move || server.serve(listener));

    address
}

fn connect(address: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(address).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    stream
}

#[test]
fn full_exchange_on_one_connection() {
    let blob = Bytes::from_static(b"some blob content");

    let store = MemoryBlobStore::new();
    let hash = store.insert(blob.clone());
    let address = start_server(store);

    let mut stream = connect(address);
    let mut responses = RequestFramer::new(stream.try_clone().unwrap());

    // Sent back to back, answered in order.
    let requests = format!(
        r#"{{"requested_blobs": ["{hash}", "{}"]}}{{"blob_data_payment_rate": 0.0}}"#,
        blob_hash(b"missing")
    );
    stream.write_all(requests.as_bytes()).unwrap();

    let availability: AvailabilityResponse =
        serde_json::from_slice(&responses.next_request().unwrap().unwrap()).unwrap();
    assert_eq!(availability.lbrycrd_address, LBRYCRD_ADDRESS);
    assert_eq!(availability.available_blobs, vec![hash.clone()]);

    let rate: PaymentRateResponse =
        serde_json::from_slice(&responses.next_request().unwrap().unwrap()).unwrap();
    assert_eq!(rate.blob_data_payment_rate, RATE_ACCEPTED);

    drop(responses);

    // The blob follows its header directly, on a fresh connection to read it raw.
    let mut stream = connect(address);
    stream
        .write_all(format!(r#"{{"requested_blob": "{hash}"}}"#).as_bytes())
        .unwrap();

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let (header, offset) = loop {
        let read = stream.read(&mut chunk).unwrap();
        assert!(read > 0, "connection closed before the blob was received");
        buf.extend_from_slice(&chunk[..read]);

        let mut stream = serde_json::Deserializer::from_slice(&buf).into_iter::<BlobResponse>();

        if let Some(Ok(header)) = stream.next() {
            let offset = stream.byte_offset();

            if buf.len() - offset >= header.incoming_blob.length {
                break (header, offset);
            }
        }
    };

    assert_eq!(header.incoming_blob.blob_hash, hash);
    assert_eq!(header.incoming_blob.length, blob.len());

    let received = &buf[offset..];

    assert_eq!(received, &blob[..]);
    assert_eq!(blob_hash(received), hash);
    assert_eq!(Id::from_blob(received).hex(), hash);
}

#[test]
fn negative_rate_is_too_low() {
    let address = start_server(MemoryBlobStore::new());

    let mut stream = connect(address);
    stream
        .write_all(br#"{"blob_data_payment_rate": -0.5}"#)
        .unwrap();

    let mut responses = RequestFramer::new(stream);
    let rate: PaymentRateResponse =
        serde_json::from_slice(&responses.next_request().unwrap().unwrap()).unwrap();

    assert_eq!(rate.blob_data_payment_rate, RATE_TOO_LOW);
}

#[test]
fn missing_blob_closes_connection() {
    let address = start_server(MemoryBlobStore::new());

    let mut stream = connect(address);
    stream
        .write_all(format!(r#"{{"requested_blob": "{}"}}"#, blob_hash(b"missing")).as_bytes())
        .unwrap();

    let mut buf = [0u8; 64];
    assert!(matches!(stream.read(&mut buf), Ok(0) | Err(_)));
}
