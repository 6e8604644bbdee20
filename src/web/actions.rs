use super::flash;
use super::prelude::*;
use super::studio_id;
use crate::encoding::SourceImage;
use crate::studio::Studio;
use axum::extract::Multipart;
use tracing::instrument;

const PHOTO_FIELD: &str = "photos";

/// Adds every uploaded photo that fits, up to the limit.
#[instrument(skip_all)]
pub(crate) async fn upload_photos_handler(
    State(state): State<AppState>,
    session: Session,
    mut multipart: Multipart,
) -> Result<Redirect, SnowcardError> {
    let mut uploads = Vec::new();
    let mut not_an_image = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| SnowcardError::InvalidRequest(err.to_string()))?
    {
        if field.name() != Some(PHOTO_FIELD) {
            continue;
        }
        let declared = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| SnowcardError::InvalidRequest(err.to_string()))?;
        // an empty file input still submits a part
        if bytes.is_empty() {
            continue;
        }
        match SourceImage::from_upload(bytes.to_vec(), declared.as_deref()) {
            Ok(image) => uploads.push(image),
            Err(err) => {
                debug!("Rejected upload: {}", err);
                not_an_image = true;
            }
        }
    }

    let id = studio_id(&session).await?;
    let received = uploads.len();
    let added = state
        .with_studio(&id, |studio| -> Result<usize, SnowcardError> {
            let mut added = 0;
            for image in uploads {
                match studio.add_source(image) {
                    Ok(()) => added += 1,
                    Err(SnowcardError::InvalidRequest(_)) => break,
                    Err(err) => return Err(err),
                }
            }
            Ok(added)
        })
        .await?;
    info!("Added {added} of {received} uploaded photos");

    if added < received {
        flash::set_flash(&session, flash::FLASH_PHOTO_LIMIT).await?;
    } else if not_an_image {
        flash::set_flash(&session, flash::FLASH_NOT_AN_IMAGE).await?;
    }
    Ok(Redirect::to("/"))
}

/// Removes one photo.
#[instrument(skip_all, fields(index = index))]
pub(crate) async fn delete_photo_handler(
    State(state): State<AppState>,
    session: Session,
    Path(index): Path<usize>,
) -> Result<Redirect, SnowcardError> {
    let id = studio_id(&session).await?;
    state
        .with_studio(&id, |studio| studio.remove_source(index))
        .await?;
    Ok(Redirect::to("/"))
}

/// Runs the pipeline on the current photos. Also used to regenerate.
#[instrument(skip_all)]
pub(crate) async fn generate_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<Redirect, SnowcardError> {
    let id = studio_id(&session).await?;
    let ticket = match state.with_studio(&id, Studio::begin).await {
        Ok(ticket) => ticket,
        Err(SnowcardError::InvalidRequest(msg)) => {
            debug!("Not generating: {}", msg);
            flash::set_flash(&session, flash::FLASH_NO_PHOTOS).await?;
            return Ok(Redirect::to("/"));
        }
        Err(err) => return Err(err),
    };

    // the run lands in the studio even if the browser goes away mid-request
    let run = tokio::spawn(async move {
        let result = state.pipeline.run(ticket.sources()).await;
        if let Err(err) = &result {
            info!("Generation {} failed: {}", ticket.generation(), err);
        }
        state
            .with_studio(&id, |studio| studio.complete(&ticket, result))
            .await
    });
    let applied = run
        .await
        .map_err(|err| SnowcardError::InternalServerError(format!("generation task: {err}")))?;
    if !applied {
        flash::set_flash(&session, flash::FLASH_STALE_RESULT).await?;
    }
    Ok(Redirect::to("/"))
}

/// Forgets photos, card and error.
pub(crate) async fn reset_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<Redirect, SnowcardError> {
    let id = studio_id(&session).await?;
    state.with_studio(&id, Studio::reset).await;
    Ok(Redirect::to("/"))
}
