use crate::config::Settings;

/// Builds the caption for a ContentItem: source caption wins, else the
/// caption template filled with source text; hashtags appended after a
/// blank line; the result is truncated to `caption_max_length` with
/// trailing whitespace stripped.
pub fn build_caption(source_caption: &str, source_text: &str, settings: &Settings) -> String {
    let mut caption = source_caption.trim().to_string();
    if caption.is_empty() {
        caption = settings
            .captions
            .caption_template
            .replace("{text}", source_text.trim());
    }

    let hashtags = settings.captions.append_hashtags.trim();
    if !hashtags.is_empty() {
        caption = if caption.is_empty() {
            hashtags.to_string()
        } else {
            format!("{caption}\n\n{hashtags}")
        };
    }

    if caption.chars().count() > settings.captions.caption_max_length {
        tracing::warn!(event = "caption_truncated");
        caption = caption
            .chars()
            .take(settings.captions.caption_max_length)
            .collect::<String>()
            .trim_end()
            .to_string();
    }

    caption
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Aggregator, App, Captions, Database, Logging, Publishing, RateLimit, Server, Storage,
        TikTok as TikTokCfg, Telegram,
    };

    fn settings(caption_max_length: usize, hashtags: &str) -> Settings {
        Settings {
            env: "test".into(),
            app: App {
                name: "test".into(),
                base_url: "http://localhost".into(),
            },
            telegram: Telegram {
                bot_token: "".into(),
                webhook_secret: "".into(),
                use_webhook: true,
                allowed_chat_ids: "".into(),
                to_tiktok_mapping_json: "".into(),
                polling_timeout_seconds: 30,
                polling_interval_seconds: 1.0,
            },
            tiktok: TikTokCfg {
                client_key: "".into(),
                client_secret: "".into(),
                redirect_uri: "".into(),
            },
            publishing: Publishing {
                posting_mode: "draft".into(),
                fallback_to_draft: true,
                enable_photo_api: false,
            },
            captions: Captions {
                append_hashtags: hashtags.into(),
                caption_template: "From TG: {text}".into(),
                caption_max_length,
            },
            storage: Storage {
                media_storage_path: "./data/media".into(),
            },
            aggregator: Aggregator {
                media_group_flush_seconds: 3,
                slide_seconds: 2,
                slideshow_fps: 30,
            },
            rate_limit: RateLimit { per_minute: 6 },
            database: Database {
                url: "postgres://localhost/test".into(),
                max_connections: Some(1),
            },
            logging: Logging { level: None },
            server: Server {
                bind_addr: "0.0.0.0:8000".into(),
            },
        }
    }

    #[test]
    fn prefers_source_caption() {
        let s = settings(2200, "");
        assert_eq!(build_caption("hello", "ignored", &s), "hello");
    }

    #[test]
    fn falls_back_to_template() {
        let s = settings(2200, "");
        assert_eq!(build_caption("", "world", &s), "From TG: world");
    }

    #[test]
    fn appends_hashtags_with_blank_line() {
        let s = settings(2200, "#fyp #viral");
        assert_eq!(build_caption("hello", "x", &s), "hello\n\n#fyp #viral");
    }

    #[test]
    fn truncates_and_strips_trailing_whitespace() {
        let s = settings(5, "");
        assert_eq!(build_caption("hello world", "x", &s), "hello");
    }
}
