//! Single-file mode over a real listener.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};

use crate::fixtures::serve_movie;

const MOVIE: &str = "Season 1/episode one.mkv";

#[tokio::test]
async fn test_full_download_matches_file_region() {
    let served = serve_movie(true).await;
    let movie = served.file(MOVIE);

    let response = reqwest::get(served.url("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "video/x-matroska");
    assert_eq!(response.headers()[ACCEPT_RANGES], "bytes");
    assert_eq!(response.headers()[CONTENT_LENGTH], "5000");
    let body = response.bytes().await.unwrap();
    assert_eq!(body.to_vec(), served.file_bytes(&movie));
}

#[tokio::test]
async fn test_range_requests() {
    let served = serve_movie(true).await;
    let movie = served.file(MOVIE);
    let client = reqwest::Client::new();

    let response = client
        .get(served.url("/"))
        .header(RANGE, "bytes=1000-1999")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 1000-1999/5000");
    assert_eq!(
        response.bytes().await.unwrap().to_vec(),
        served.expected(movie.offset() + 1000, 1000)
    );

    let response = client
        .get(served.url("/"))
        .header(RANGE, "bytes=-100")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 4900-4999/5000");
    assert_eq!(
        response.bytes().await.unwrap().to_vec(),
        served.expected(movie.offset() + 4900, 100)
    );
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let served = serve_movie(true).await;

    let response = reqwest::Client::new()
        .get(served.url("/"))
        .header(RANGE, "bytes=5000-")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes */5000");
}

#[tokio::test]
async fn test_head_reports_length_without_reading() {
    // Nothing is complete: a HEAD that touched the swarm would hang.
    let served = serve_movie(false).await;

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        reqwest::Client::new().head(served.url("/")).send(),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_LENGTH], "5000");
}

#[tokio::test]
async fn test_response_waits_for_pieces() {
    let served = serve_movie(false).await;
    let movie = served.file(MOVIE);

    let url = served.url("/");
    let request = tokio::spawn(async move {
        let response = reqwest::Client::new()
            .get(url)
            .header(RANGE, "bytes=0-99")
            .send()
            .await?;
        response.bytes().await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!request.is_finished());

    served.handle.complete_all();
    let body = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(body.to_vec(), served.expected(movie.offset(), 100));
}

#[tokio::test]
async fn test_concurrent_requests_have_independent_cursors() {
    let served = serve_movie(true).await;
    let movie = served.file(MOVIE);
    let client = reqwest::Client::new();

    let fetch = |range: &'static str| {
        let request = client.get(served.url("/")).header(RANGE, range).send();
        async move { request.await.unwrap().bytes().await.unwrap() }
    };

    let (head, tail) = tokio::join!(fetch("bytes=0-2999"), fetch("bytes=1000-4999"));

    assert_eq!(head.to_vec(), served.expected(movie.offset(), 3000));
    assert_eq!(tail.to_vec(), served.expected(movie.offset() + 1000, 4000));
}

#[tokio::test]
async fn test_playlist_routes_absent_in_single_mode() {
    let served = serve_movie(true).await;

    let response = reqwest::get(served.url("/playlist.m3u")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "Not Found");
}
