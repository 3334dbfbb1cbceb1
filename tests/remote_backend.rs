use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::JoinHandle;
use std::time::Duration;

use live_detect::transport::HttpTransport;
use live_detect::{
    BackendError, DetectServer, Frame, InferenceBackend, RemoteBackend, RemoteSettings,
    ServerConfig, ServerHandle,
};

fn start_server() -> ServerHandle {
    DetectServer::new(ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        models_dir: None,
    })
    .spawn()
    .expect("spawn detect server")
}

fn settings(endpoint: String) -> RemoteSettings {
    RemoteSettings {
        timeout: Duration::from_secs(2),
        ..RemoteSettings::new(endpoint)
    }
}

fn grey_frame(id: u64, capture_ts: i64) -> Frame {
    Frame::new(id, capture_ts, vec![90; 64 * 48 * 3], 64, 48)
}

/// Serve one connection: read the request, reply with `response` verbatim.
fn reply_once(listener: TcpListener, response: &'static str) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream);
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read header");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().expect("content-length");
                }
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).expect("read body");
        let mut stream = reader.into_inner();
        stream.write_all(response.as_bytes()).expect("write response");
    })
}

#[test]
fn round_trip_against_detect_server() {
    let server = start_server();
    let mut backend =
        RemoteBackend::connect(settings(format!("http://{}", server.addr))).expect("connect");

    let capture_ts = live_detect::now_ms() - 5;
    let result = backend.infer(&grey_frame(41, capture_ts)).expect("infer");
    assert_eq!(result.frame_id, 41);
    assert_eq!(result.capture_ts, capture_ts);
    assert!(result.recv_ts >= capture_ts);
    assert!(result.inference_ts >= result.recv_ts);
    assert!(result.detections.is_empty());
    assert_eq!(backend.consecutive_failures(), 0);

    server.stop().unwrap();
}

#[test]
fn server_side_failure_costs_only_the_frame() {
    let server = start_server();
    let mut backend = RemoteBackend::connect(RemoteSettings {
        model_name: "missing.onnx".to_string(),
        ..settings(format!("http://{}", server.addr))
    })
    .expect("connect");

    let result = backend.infer(&grey_frame(7, 1_000)).expect("empty result");
    assert_eq!(result.frame_id, 7);
    assert!(result.detections.is_empty());
    assert!(result.inference_ts >= result.recv_ts);

    server.stop().unwrap();
}

#[test]
fn connect_fails_fast_when_nothing_listens() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = match RemoteBackend::connect(settings(format!("http://127.0.0.1:{}", port))) {
        Ok(_) => panic!("connect succeeded against a closed port"),
        Err(err) => err,
    };
    assert!(matches!(err, BackendError::Unreachable(_)));
    assert!(err.is_fatal());
}

#[test]
fn silent_server_times_out_without_counting_a_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let transport = HttpTransport::new(&format!("http://{}", addr)).unwrap();
    let mut backend = RemoteBackend::with_transport(
        Box::new(transport),
        RemoteSettings {
            timeout: Duration::from_millis(200),
            ..RemoteSettings::new(format!("http://{}", addr))
        },
    );

    let err = backend.infer(&grey_frame(1, 1_000)).unwrap_err();
    assert!(matches!(err, BackendError::Timeout(_)), "got {:?}", err);
    assert!(!err.is_fatal());
    assert_eq!(backend.consecutive_failures(), 0);
    drop(listener);
}

#[test]
fn garbage_response_yields_empty_result() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = reply_once(
        listener,
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 8\r\nConnection: close\r\n\r\nnot json",
    );
    let transport = HttpTransport::new(&format!("http://{}", addr)).unwrap();
    let mut backend =
        RemoteBackend::with_transport(Box::new(transport), settings(format!("http://{}", addr)));

    let result = backend.infer(&grey_frame(3, 1_000)).expect("empty result");
    assert_eq!(result.frame_id, 3);
    assert_eq!(result.capture_ts, 1_000);
    assert!(result.detections.is_empty());
    assert!(result.inference_ts >= result.recv_ts);
    server.join().unwrap();
}
