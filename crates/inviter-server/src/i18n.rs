//! Built-in message catalog for daemon notifications and translatable errors.
//!
//! Templates use `{name}` placeholders. Unknown locales fall back to English;
//! unknown keys render as the key itself.

use inviter_core::{HandshakeError, InviterError};

/// Locale used when a binding has none or the requested one is missing.
pub const DEFAULT_LOCALE: &str = "en";

fn english(key: &str) -> Option<&'static str> {
    Some(match key {
        "daemon.welcome" => "Connected to the invite relay as {user}.",
        "daemon.link_account" => {
            "This daemon is not linked to an account yet. Run the copied command in chat to link it."
        }
        "error.send_request_failed" => "Failed to send the request to your daemon.",
        "error.invalid_response_json" => "Your daemon sent a malformed response.",
        "error.invalid_response_message" => "Your daemon sent an incomplete response.",
        "error.invalid_response_type" => "Your daemon answered a different request.",
        "error.daemon_disconnected" => "Your daemon disconnected ({reason}).",
        "error.request_timeout" => "Your daemon did not respond in time.",
        "error.daemon_unknown" => "Your daemon reported an unknown error.",
        "error.daemon_invalid_cmd" => "Your daemon does not support this command.",
        "error.daemon_invalid_app" => "No game is running, or the game does not support Remote Play.",
        "error.handshake_invalid_version" => "The daemon sent an invalid version.",
        "error.handshake_outdated" => "This daemon is outdated. Version {required} or newer is required.",
        "error.handshake_invalid_token" => "The daemon sent an invalid token.",
        "error.handshake_invalid_session" => "The daemon sent an invalid session.",
        _ => return None,
    })
}

fn japanese(key: &str) -> Option<&'static str> {
    Some(match key {
        "daemon.welcome" => "{user} としてリレーに接続しました。",
        "daemon.link_account" => {
            "このデーモンはまだアカウントと連携されていません。コピーしたコマンドをチャットで実行してください。"
        }
        "error.send_request_failed" => "デーモンへのリクエスト送信に失敗しました。",
        "error.invalid_response_json" => "デーモンから不正な応答が返されました。",
        "error.invalid_response_message" => "デーモンから不完全な応答が返されました。",
        "error.invalid_response_type" => "デーモンが別のリクエストに応答しました。",
        "error.daemon_disconnected" => "デーモンとの接続が切れました ({reason})。",
        "error.request_timeout" => "デーモンが時間内に応答しませんでした。",
        "error.daemon_unknown" => "デーモンで不明なエラーが発生しました。",
        "error.daemon_invalid_cmd" => "デーモンがこのコマンドに対応していません。",
        "error.daemon_invalid_app" => "ゲームが起動していないか、Remote Play に対応していません。",
        "error.handshake_invalid_version" => "デーモンのバージョンが不正です。",
        "error.handshake_outdated" => "デーモンが古すぎます。バージョン {required} 以上が必要です。",
        "error.handshake_invalid_token" => "デーモンのトークンが不正です。",
        "error.handshake_invalid_session" => "デーモンのセッションが不正です。",
        _ => return None,
    })
}

fn template(key: &str, locale: &str) -> Option<&'static str> {
    let lang = locale.split(['-', '_']).next().unwrap_or(DEFAULT_LOCALE);
    let localized = match lang {
        "ja" => japanese(key),
        _ => None,
    };
    localized.or_else(|| english(key))
}

/// Translate `key` into `locale`, substituting `{name}` placeholders.
pub fn translate(key: &str, locale: &str, params: &[(&str, String)]) -> String {
    let Some(template) = template(key, locale) else {
        return key.to_string();
    };
    params
        .iter()
        .fold(template.to_string(), |text, (name, value)| {
            text.replace(&format!("{{{name}}}"), value)
        })
}

/// Render a protocol error for a user.
pub fn translate_error(error: &InviterError, locale: &str) -> String {
    translate(error.message_key(), locale, &error.params())
}

/// Render a handshake rejection for the daemon's user.
pub fn translate_handshake_error(error: &HandshakeError, locale: &str) -> String {
    let params = match error {
        HandshakeError::Outdated { required, .. } => vec![("required", required.clone())],
        _ => Vec::new(),
    };
    translate(error.message_key(), locale, &params)
}
