use async_trait::async_trait;
use tracing::debug;

use crate::errors::Result;
use crate::lesion::LesionType;
use crate::model::{InputTensor, ProbabilityMap};

/// ロード済みのセグメンテーションモデル（1リクエスト分のセッション）
pub trait SegmentationSession: Send {
    /// 入力テンソルから確率マップを推論
    fn predict(&mut self, input: &InputTensor) -> Result<ProbabilityMap>;
}

/// モデルアーティファクトの読み込みを抽象化
///
/// 依存関係逆転原則（DIP）に従い、ONNX Runtime の具象実装ではなく抽象に依存する
pub trait ModelLoader: Send + Sync {
    type Session: SegmentationSession;

    /// 病変タイプに対応するモデルを読み込む
    fn load(&self, lesion: LesionType) -> Result<Self::Session>;
}

/// セッションの取得・解放ポリシー
///
/// `acquire` で得たセッションは必ず `release` に戻す。呼び出し側は
/// [`crate::session::SessionLease`] を通して使うことで解放漏れを防ぐ
pub trait ModelSessionProvider: Send + Sync {
    type Session: SegmentationSession;

    fn acquire(&self, lesion: LesionType) -> Result<Self::Session>;

    fn release(&self, lesion: LesionType, session: Self::Session);

    /// 推論に失敗したセッションを再利用せずに破棄する
    fn discard(&self, lesion: LesionType, session: Self::Session) {
        drop(session);
        debug!(%lesion, "failed model session discarded");
    }
}

/// 画像取得の抽象化
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// URL から画像を取得してデコードする
    async fn fetch(&self, url: &str) -> Result<image::RgbImage>;
}

/// 結果画像の公開先の抽象化
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    /// JPEG バイト列をアップロードし、公開 URL を返す
    async fn upload(&self, jpeg: Vec<u8>, folder: &str, public_id: &str) -> Result<String>;
}

/// 1リクエスト分の推論パイプライン
///
/// HTTP 層はこのトレイト越しに呼び出すため、具象のセッション・画像ソース・
/// アップローダーの型を知らなくてよい
#[async_trait]
pub trait LesionInference: Send + Sync {
    async fn infer(&self, lesion: LesionType, image_url: &str) -> Result<crate::InferenceResult>;
}
