//! Bundle every payload file into one gzip tarball
//!
//! cloud-init writes the archive, the first two commands unpack it: once
//! verbatim, then once more through `cloud-init query` so node placeholders
//! resolve the same way they would in embedded files.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::types::InitFile;
use crate::Result;

/// Where the archive is written on the node
pub const ARCHIVE_PATH: &str = "/tmp/cloud-init-files.tgz";

/// Commands that unpack [`ARCHIVE_PATH`] into `/`
pub fn extraction_commands() -> Vec<String> {
    vec![
        format!("tar -C / -xvf {ARCHIVE_PATH}"),
        format!("tar -xf {ARCHIVE_PATH} --to-command='xargs -0 cloud-init query -f > /$TAR_FILENAME'"),
    ]
}

/// One base64 encoded archive file holding `files`, paths made relative to `/`
pub fn archive_files(files: &[InitFile]) -> Result<InitFile> {
    let mtime = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    for file in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(file.content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        builder.append_data(
            &mut header,
            file.path.trim_start_matches('/'),
            file.content.as_bytes(),
        )?;
    }

    let compressed = builder.into_inner()?.finish()?;
    Ok(InitFile {
        path: ARCHIVE_PATH.to_string(),
        content: STANDARD.encode(compressed),
        encoding: "b64".to_string(),
        ..InitFile::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn unpack(archive: &InitFile) -> Vec<(String, u32, String)> {
        let bytes = STANDARD.decode(&archive.content).unwrap();
        let mut tar = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
        tar.entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let path = entry.path().unwrap().to_string_lossy().into_owned();
                let mode = entry.header().mode().unwrap();
                let mut content = String::new();
                entry.read_to_string(&mut content).unwrap();
                (path, mode, content)
            })
            .collect()
    }

    #[test]
    fn files_are_stored_relative_to_root() {
        let files = vec![
            InitFile::new("/var/lib/kubeadm/manifests/a.yaml", "kind: A\n"),
            InitFile::new("/tmp/init-cluster.sh", "#!/bin/bash\n").with_permissions("0755"),
        ];

        let archive = archive_files(&files).unwrap();

        assert_eq!(archive.path, ARCHIVE_PATH);
        assert!(archive.is_base64());
        assert_eq!(
            unpack(&archive),
            vec![
                ("var/lib/kubeadm/manifests/a.yaml".to_string(), 0o644, "kind: A\n".to_string()),
                ("tmp/init-cluster.sh".to_string(), 0o644, "#!/bin/bash\n".to_string()),
            ]
        );
    }

    #[test]
    fn long_paths_survive() {
        let path = format!("/var/lib/{}values.yaml", "nested/".repeat(30));
        let archive = archive_files(&[InitFile::new(path.clone(), "x")]).unwrap();
        assert_eq!(unpack(&archive)[0].0, path.trim_start_matches('/'));
    }

    #[test]
    fn extraction_writes_then_requeries() {
        let commands = extraction_commands();
        assert_eq!(commands[0], "tar -C / -xvf /tmp/cloud-init-files.tgz");
        assert_eq!(
            commands[1],
            "tar -xf /tmp/cloud-init-files.tgz --to-command='xargs -0 cloud-init query -f > /$TAR_FILENAME'"
        );
    }
}
