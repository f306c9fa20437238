//! Kickstart files for boot ISO image types.
//!
//! Accounts requested by the blueprint cannot be baked into an installer's
//! tree; they are created by anaconda from the kickstart instead. The file
//! also points anaconda at the payload the ISO carries.

use imgplan_defs::ImageKind;
use imgplan_schema::{GroupCustomization, InstallerCustomization, UserCustomization};

pub const ISO_ROOT_PATH: &str = "/osbuild.ks";
pub const INTERACTIVE_DEFAULTS_PATH: &str = "/usr/share/anaconda/interactive-defaults.ks";
pub const OSTREE_REPO_URL: &str = "file:///run/install/repo/ostree/repo";
pub const LIVEIMG_URL: &str = "file:///run/install/repo/liveimg.tar.gz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OstreePayload {
    pub osname: String,
    pub remote: String,
    pub reference: String,
}

#[derive(Debug, Clone, Default)]
pub struct KickstartRequest<'a> {
    pub kind: Option<ImageKind>,
    pub users: &'a [UserCustomization],
    pub groups: &'a [GroupCustomization],
    pub installer: Option<&'a InstallerCustomization>,
    pub ostree: Option<OstreePayload>,
    /// Write the file to the ISO root rather than the installer's
    /// interactive defaults.
    pub iso_root: bool,
    pub language: Option<&'a str>,
    pub keyboard: Option<&'a str>,
    pub timezone: Option<&'a str>,
    pub fs_type: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kickstart {
    pub path: String,
    pub contents: String,
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn user_line(user: &UserCustomization) -> String {
    let mut line = format!("user --name={}", user.name);
    if let Some(description) = &user.description {
        line.push_str(&format!(" --gecos={}", quote(description)));
    }
    if let Some(password) = &user.password {
        if password.starts_with('$') {
            line.push_str(&format!(" --password={} --iscrypted", quote(password)));
        } else {
            line.push_str(&format!(" --password={} --plaintext", quote(password)));
        }
    }
    if let Some(home) = &user.home {
        line.push_str(&format!(" --homedir={home}"));
    }
    if let Some(shell) = &user.shell {
        line.push_str(&format!(" --shell={shell}"));
    }
    if !user.groups.is_empty() {
        line.push_str(&format!(" --groups={}", user.groups.join(",")));
    }
    if let Some(uid) = user.uid {
        line.push_str(&format!(" --uid={uid}"));
    }
    if let Some(gid) = user.gid {
        line.push_str(&format!(" --gid={gid}"));
    }
    line
}

fn sudoers_post(entries: &[String]) -> Vec<String> {
    let mut lines = vec!["%post".to_owned()];
    for entry in entries {
        let file = entry.trim_start_matches('%');
        lines.push(format!(
            "echo -e \"{entry}\\tALL=(ALL)\\tNOPASSWD: ALL\" > \"/etc/sudoers.d/{file}\""
        ));
        lines.push(format!("chmod 0440 /etc/sudoers.d/{file}"));
    }
    lines.push("restorecon -rvF /etc/sudoers.d".to_owned());
    lines.push("%end".to_owned());
    lines
}

/// Render the kickstart, or nothing when the ISO needs none.
pub fn render(req: &KickstartRequest<'_>) -> Option<Kickstart> {
    let installer = req.installer;
    let unattended = installer.is_some_and(|i| i.unattended);
    let sudo: &[String] = installer.map_or(&[], |i| i.sudo_nopasswd.as_slice());
    let custom = installer
        .and_then(|i| i.kickstart.as_ref())
        .map(|k| k.contents.trim())
        .filter(|c| !c.is_empty());

    let mut lines: Vec<String> = Vec::new();
    if let Some(ostree) = &req.ostree {
        lines.push(format!(
            "ostreesetup --osname={} --remote={} --url={OSTREE_REPO_URL} --ref={} --nogpg",
            ostree.osname, ostree.remote, ostree.reference
        ));
    } else if req.kind == Some(ImageKind::TarInstaller) {
        lines.push(format!("liveimg --url {LIVEIMG_URL}"));
    }

    for group in req.groups {
        match group.gid {
            Some(gid) => lines.push(format!("group --name={} --gid={gid}", group.name)),
            None => lines.push(format!("group --name={}", group.name)),
        }
    }
    for user in req.users {
        lines.push(user_line(user));
        if let Some(key) = &user.key {
            lines.push(format!("sshkey --username={} {}", user.name, quote(key)));
        }
    }

    if unattended {
        lines.push(format!("lang {}", req.language.unwrap_or("en_US.UTF-8")));
        lines.push(format!("keyboard {}", req.keyboard.unwrap_or("us")));
        lines.push(format!("timezone {}", req.timezone.unwrap_or("UTC")));
        lines.push("zerombr".to_owned());
        lines.push("clearpart --all --initlabel --disklabel=gpt".to_owned());
        lines.push(format!("autopart --nohome --type=plain --fstype={}", req.fs_type));
        lines.push("network --bootproto=dhcp --device=link --activate --onboot=on".to_owned());
        lines.push("rootpw --lock".to_owned());
        lines.push("reboot --eject".to_owned());
    }
    if !sudo.is_empty() {
        lines.extend(sudoers_post(sudo));
    }
    if let Some(custom) = custom {
        lines.push(custom.to_owned());
    }

    if lines.is_empty() {
        return None;
    }
    let mut contents = lines.join("\n");
    contents.push('\n');
    Some(Kickstart {
        path: if req.iso_root {
            ISO_ROOT_PATH.to_owned()
        } else {
            INTERACTIVE_DEFAULTS_PATH.to_owned()
        },
        contents,
    })
}

/// Kernel argument that makes anaconda load a kickstart from the ISO.
pub fn kernel_option(iso_label: &str, path: &str) -> String {
    format!("inst.ks=hd:LABEL={}:{path}", iso_label.replace(' ', "\\x20"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgplan_schema::customizations::KickstartCustomization;

    #[test]
    fn ostree_payload_and_users() {
        let users = [UserCustomization {
            name: "admin".to_owned(),
            password: Some("$6$salt$hash".to_owned()),
            groups: vec!["wheel".to_owned()],
            key: Some("ssh-ed25519 AAAA".to_owned()),
            ..Default::default()
        }];
        let ks = render(&KickstartRequest {
            kind: Some(ImageKind::OstreeInstaller),
            users: &users,
            ostree: Some(OstreePayload {
                osname: "rhel".to_owned(),
                remote: "rhel".to_owned(),
                reference: "rhel/9/x86_64/edge".to_owned(),
            }),
            iso_root: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(ks.path, ISO_ROOT_PATH);
        let lines: Vec<&str> = ks.contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "ostreesetup --osname=rhel --remote=rhel --url=file:///run/install/repo/ostree/repo --ref=rhel/9/x86_64/edge --nogpg",
                "user --name=admin --password=\"$6$salt$hash\" --iscrypted --groups=wheel",
                "sshkey --username=admin \"ssh-ed25519 AAAA\"",
            ]
        );
    }

    #[test]
    fn unattended_sudo_and_custom_contents() {
        let installer = InstallerCustomization {
            unattended: true,
            sudo_nopasswd: vec!["%wheel".to_owned()],
            kickstart: Some(KickstartCustomization {
                contents: "text --non-interactive\n".to_owned(),
            }),
            ..Default::default()
        };
        let ks = render(&KickstartRequest {
            kind: Some(ImageKind::TarInstaller),
            installer: Some(&installer),
            fs_type: "xfs",
            ..Default::default()
        })
        .unwrap();
        assert_eq!(ks.path, INTERACTIVE_DEFAULTS_PATH);
        assert!(ks.contents.starts_with("liveimg --url file:///run/install/repo/liveimg.tar.gz\n"));
        assert!(ks.contents.contains("autopart --nohome --type=plain --fstype=xfs\n"));
        assert!(ks.contents.contains("> \"/etc/sudoers.d/wheel\"\n"));
        assert!(ks.contents.ends_with("text --non-interactive\n"));
    }

    #[test]
    fn nothing_to_say() {
        let req = KickstartRequest {
            kind: Some(ImageKind::LiveInstaller),
            ..Default::default()
        };
        assert_eq!(render(&req), None);
        assert_eq!(
            kernel_option("Fedora-42 x86_64", ISO_ROOT_PATH),
            "inst.ks=hd:LABEL=Fedora-42\\x20x86_64:/osbuild.ks"
        );
    }
}
