//! Playlist mode over a real listener.

use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, RANGE};
use undertow_web::ServeMode;

use crate::fixtures::{pack, serve};

#[tokio::test]
async fn test_playlist_lists_playable_files() {
    let served = serve(pack(), |_| ServeMode::Playlist, true).await;

    let response = reqwest::get(served.url("/playlist.m3u")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[CONTENT_TYPE],
        "application/vnd.apple.mpegurl"
    );
    let expected = format!(
        "#EXTM3U\n\
         #EXTINFO:0,Season 1/episode one.mkv\n\
         http://{0}/Season%201/episode%20one.mkv\n\
         #EXTINFO:0,track.mp3\n\
         http://{0}/track.mp3\n",
        served.address
    );
    assert_eq!(response.text().await.unwrap(), expected);
}

#[tokio::test]
async fn test_playlist_urls_serve_their_files() {
    let served = serve(pack(), |_| ServeMode::Playlist, true).await;

    let playlist = reqwest::get(served.url("/playlist.m3u"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let urls: Vec<&str> = playlist
        .lines()
        .filter(|line| line.starts_with("http://"))
        .collect();
    assert_eq!(urls.len(), 2);

    for (url, path) in urls.iter().zip(["Season 1/episode one.mkv", "track.mp3"]) {
        let entry = served.file(path);
        let body = reqwest::get(*url).await.unwrap().bytes().await.unwrap();
        assert_eq!(body.to_vec(), served.file_bytes(&entry), "{path}");
    }
}

#[tokio::test]
async fn test_file_routes_honor_ranges() {
    let served = serve(pack(), |_| ServeMode::Playlist, true).await;
    let track = served.file("track.mp3");

    let response = reqwest::Client::new()
        .get(served.url("/track.mp3"))
        .header(RANGE, "bytes=1200-")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.bytes().await.unwrap().to_vec(),
        served.expected(track.offset() + 1200, 100)
    );
}

#[tokio::test]
async fn test_unknown_file_is_not_found() {
    let served = serve(pack(), |_| ServeMode::Playlist, false).await;
    let swarm = served.handle.swarm().unwrap();

    let response = reqwest::get(served.url("/nonexistent.mkv")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(swarm.reader_count(), 0);
    assert_eq!(response.text().await.unwrap(), "Not Found");
}

#[tokio::test]
async fn test_non_media_files_are_still_served() {
    let served = serve(pack(), |_| ServeMode::Playlist, true).await;
    let cover = served.file("cover.jpg");

    let response = reqwest::get(served.url("/cover.jpg")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "image/jpeg");
    assert_eq!(
        response.bytes().await.unwrap().to_vec(),
        served.file_bytes(&cover)
    );
}
