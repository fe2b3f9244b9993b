//! Asynchronous texture fetching with platform-specific implementations

use std::collections::HashSet;

use super::cache::TextureKey;

/// Result of a texture fetch
#[derive(Debug)]
pub enum FetchResult {
    Loaded(TextureKey, Vec<u8>),
    /// The server has no content for this key
    Missing(TextureKey),
    Failed(TextureKey, String),
}

impl FetchResult {
    pub fn key(&self) -> &TextureKey {
        match self {
            FetchResult::Loaded(key, _) | FetchResult::Missing(key) | FetchResult::Failed(key, _) => key,
        }
    }
}

/// Anything that can fetch texture bytes in the background.
///
/// `request` must not block; completed fetches are drained with `poll`
/// from the frame tick.
pub trait TextureSource {
    fn request(&mut self, key: &TextureKey);
    fn poll(&mut self) -> Option<FetchResult>;
}

/// Fetch request handed to the worker
#[derive(Debug, Clone)]
struct FetchRequest {
    key: TextureKey,
    url: String,
}

#[cfg(not(target_arch = "wasm32"))]
type ResultReceiver = std::sync::mpsc::Receiver<FetchResult>;
#[cfg(not(target_arch = "wasm32"))]
type RequestSender = std::sync::mpsc::Sender<FetchRequest>;

#[cfg(target_arch = "wasm32")]
use std::sync::{Arc, Mutex};

#[cfg(target_arch = "wasm32")]
type ResultReceiver = Arc<Mutex<Vec<FetchResult>>>;

/// HTTP texture loader
pub struct TextureLoader {
    base_url: String,
    result_rx: ResultReceiver,
    #[cfg(not(target_arch = "wasm32"))]
    request_tx: RequestSender,
    in_flight: HashSet<TextureKey>,
    #[cfg(not(target_arch = "wasm32"))]
    _worker_handle: Option<std::thread::JoinHandle<()>>,
}

impl TextureLoader {
    /// Create a loader fetching from `base_url`
    ///
    /// The user agent is only applied on native builds; browsers set their own.
    pub fn new(base_url: &str, user_agent: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();

        #[cfg(not(target_arch = "wasm32"))]
        {
            let (request_tx, request_rx) = std::sync::mpsc::channel::<FetchRequest>();
            let (result_tx, result_rx) = std::sync::mpsc::channel::<FetchResult>();

            let _worker_handle = {
                let user_agent = user_agent.to_string();
                Some(std::thread::spawn(move || {
                    Self::worker_thread(request_rx, result_tx, user_agent);
                }))
            };

            Self {
                base_url,
                result_rx,
                request_tx,
                in_flight: HashSet::new(),
                _worker_handle,
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            let _ = user_agent;
            Self {
                base_url,
                result_rx: Arc::new(Mutex::new(Vec::new())),
                in_flight: HashSet::new(),
            }
        }
    }

    /// Number of requests not yet drained
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn url_for(&self, key: &TextureKey) -> String {
        format!("{}/{}", self.base_url, key.asset_path())
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn worker_thread(
        request_rx: std::sync::mpsc::Receiver<FetchRequest>,
        result_tx: std::sync::mpsc::Sender<FetchResult>,
        user_agent: String,
    ) {
        let client = match reqwest::blocking::Client::builder().user_agent(&user_agent).build() {
            Ok(client) => client,
            Err(e) => {
                log::error!("texture loader disabled: {}", e);
                return;
            }
        };

        while let Ok(request) = request_rx.recv() {
            let result = match client.get(&request.url).send() {
                Ok(response) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::NO_CONTENT || status == reqwest::StatusCode::NOT_FOUND {
                        FetchResult::Missing(request.key)
                    } else if status.is_success() {
                        match response.bytes() {
                            Ok(bytes) => FetchResult::Loaded(request.key, bytes.to_vec()),
                            Err(e) => FetchResult::Failed(request.key, e.to_string()),
                        }
                    } else {
                        FetchResult::Failed(request.key, format!("HTTP {}", status))
                    }
                }
                Err(e) => FetchResult::Failed(request.key, e.to_string()),
            };

            if result_tx.send(result).is_err() {
                break; // Receiver dropped, exit thread
            }
        }
    }

    #[cfg(target_arch = "wasm32")]
    fn spawn_wasm_fetch(&self, request: FetchRequest) {
        use wasm_bindgen::JsCast;
        use wasm_bindgen_futures::JsFuture;
        use web_sys::{Request, RequestInit, RequestMode, Response};

        let result_buffer = self.result_rx.clone();

        wasm_bindgen_futures::spawn_local(async move {
            let result: Result<Option<Vec<u8>>, String> = async {
                let opts = RequestInit::new();
                opts.set_method("GET");
                opts.set_mode(RequestMode::Cors);

                let web_request = Request::new_with_str_and_init(&request.url, &opts)
                    .map_err(|e| format!("Failed to create request: {:?}", e))?;

                let window = web_sys::window().ok_or("No window object")?;
                let resp_value = JsFuture::from(window.fetch_with_request(&web_request))
                    .await
                    .map_err(|e| format!("Fetch failed: {:?}", e))?;

                let resp: Response = resp_value
                    .dyn_into()
                    .map_err(|_| "Response is not a Response object")?;

                if resp.status() == 204 || resp.status() == 404 {
                    return Ok(None);
                }
                if !resp.ok() {
                    return Err(format!("HTTP {}", resp.status()));
                }

                let array_buffer = JsFuture::from(
                    resp.array_buffer()
                        .map_err(|e| format!("Failed to get array buffer: {:?}", e))?,
                )
                .await
                .map_err(|e| format!("Failed to read array buffer: {:?}", e))?;

                Ok(Some(js_sys::Uint8Array::new(&array_buffer).to_vec()))
            }
            .await;

            let fetch_result = match result {
                Ok(Some(bytes)) => FetchResult::Loaded(request.key, bytes),
                Ok(None) => FetchResult::Missing(request.key),
                Err(err) => FetchResult::Failed(request.key, err),
            };

            if let Ok(mut results) = result_buffer.lock() {
                results.push(fetch_result);
            }
        });
    }
}

impl TextureSource for TextureLoader {
    fn request(&mut self, key: &TextureKey) {
        if self.in_flight.contains(key) {
            return;
        }

        let request = FetchRequest {
            key: key.clone(),
            url: self.url_for(key),
        };
        log::debug!("Requesting texture {}", request.url);

        #[cfg(not(target_arch = "wasm32"))]
        {
            if self.request_tx.send(request).is_ok() {
                self.in_flight.insert(key.clone());
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            self.in_flight.insert(key.clone());
            self.spawn_wasm_fetch(request);
        }
    }

    fn poll(&mut self) -> Option<FetchResult> {
        #[cfg(not(target_arch = "wasm32"))]
        let next = self.result_rx.try_recv().ok();

        #[cfg(target_arch = "wasm32")]
        let next = self.result_rx.lock().ok().and_then(|mut results| results.pop());

        if let Some(result) = &next {
            self.in_flight.remove(result.key());
        }
        next
    }
}

impl Default for TextureLoader {
    fn default() -> Self {
        Self::new("assets", "IsoTile/0.1")
    }
}

/// Which pixels of a fetched image become transparent
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColorKey {
    /// A fixed key color
    Fixed([u8; 3]),
    /// Whatever color the top-left pixel has
    Corner,
}

/// Decode image bytes and apply color-key transparency
pub fn decode_texture(data: &[u8], key: ColorKey, tolerance: u8) -> Result<image::RgbaImage, image::ImageError> {
    let mut img = image::load_from_memory(data)?.to_rgba8();
    apply_color_key(&mut img, key, tolerance);
    Ok(img)
}

/// Clear the alpha of every pixel within `tolerance` of the key color
pub fn apply_color_key(img: &mut image::RgbaImage, key: ColorKey, tolerance: u8) {
    let key_rgb = match key {
        ColorKey::Fixed(rgb) => rgb,
        ColorKey::Corner => match img.pixels().next() {
            Some(p) => [p[0], p[1], p[2]],
            None => return,
        },
    };

    for pixel in img.pixels_mut() {
        let matches = (0..3).all(|c| pixel[c].abs_diff(key_rgb[c]) <= tolerance);
        if matches {
            pixel[3] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_corner_key_clears_matching_pixels() {
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([10, 200, 10, 255]));
        img.put_pixel(2, 2, Rgba([90, 90, 90, 255]));
        img.put_pixel(3, 3, Rgba([12, 198, 11, 255]));
        apply_color_key(&mut img, ColorKey::Corner, 4);
        assert_eq!(img.get_pixel(0, 0)[3], 0);
        assert_eq!(img.get_pixel(3, 3)[3], 0);
        assert_eq!(img.get_pixel(2, 2)[3], 255);
    }

    #[test]
    fn test_fixed_key_respects_tolerance() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([255, 0, 255, 255]));
        img.put_pixel(1, 0, Rgba([240, 0, 255, 255]));
        apply_color_key(&mut img, ColorKey::Fixed([255, 0, 255]), 8);
        assert_eq!(img.get_pixel(0, 0)[3], 0);
        assert_eq!(img.get_pixel(1, 0)[3], 255);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_texture(b"not an image", ColorKey::Corner, 8).is_err());
    }
}
