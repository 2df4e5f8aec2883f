//! Installation guidance shown when a toolchain is missing.

use crate::language::Language;
use crate::probe::HostOs;

/// Host-specific instructions for installing the toolchain of `language`.
pub fn install_guide(language: Language, os: HostOs) -> String {
    let steps: &[&str] = match (language, os) {
        (Language::Python, HostOs::Windows) => &[
            "Download the installer from https://www.python.org/downloads/windows/",
            "Tick \"Add python.exe to PATH\" during installation",
        ],
        (Language::Python, HostOs::MacOs) => &[
            "Install with Homebrew: `brew install python`",
            "Or download from https://www.python.org/downloads/macos/",
        ],
        (Language::Python, _) => &[
            "Ubuntu/Debian: `sudo apt update && sudo apt install python3 python3-pip`",
            "Fedora: `sudo dnf install python3 python3-pip`",
            "Arch Linux: `sudo pacman -S python python-pip`",
        ],

        (Language::JavaScript, HostOs::Windows) => &[
            "Download the LTS installer from https://nodejs.org/",
            "Run the installer and keep the default options (npm is included)",
            "Restart the terminal so PATH is refreshed",
        ],
        (Language::JavaScript, HostOs::MacOs) => &[
            "Download the LTS installer from https://nodejs.org/",
            "Or install with Homebrew: `brew install node`",
        ],
        (Language::JavaScript, _) => &[
            "Ubuntu/Debian: `sudo apt update && sudo apt install nodejs npm`",
            "Fedora: `sudo dnf install nodejs`",
            "Arch Linux: `sudo pacman -S nodejs npm`",
            "More options: https://nodejs.org/",
        ],

        (Language::Java, HostOs::Windows) => &[
            "Download a JDK from https://adoptium.net/ or https://www.oracle.com/java/technologies/downloads/",
            "Set JAVA_HOME and add %JAVA_HOME%\\bin to PATH",
        ],
        (Language::Java, HostOs::MacOs) => &[
            "Download a JDK from https://adoptium.net/",
            "Or install with Homebrew: `brew install openjdk@17`",
        ],
        (Language::Java, _) => &[
            "Ubuntu/Debian: `sudo apt update && sudo apt install default-jdk`",
            "Fedora: `sudo dnf install java-17-openjdk-devel`",
            "Arch Linux: `sudo pacman -S jdk-openjdk`",
        ],

        (Language::CSharp, HostOs::MacOs) => &[
            "Download the .NET SDK from https://dotnet.microsoft.com/download",
            "Or install with Homebrew: `brew install dotnet-sdk`",
        ],
        (Language::CSharp, HostOs::Windows) => &[
            "Download the .NET SDK from https://dotnet.microsoft.com/download",
        ],
        (Language::CSharp, _) => &[
            "Follow https://learn.microsoft.com/dotnet/core/install/linux for your distribution",
            "Ubuntu example: `sudo apt-get update && sudo apt-get install -y dotnet-sdk-8.0`",
        ],

        (Language::Cpp, HostOs::Windows) => &[
            "Install Visual Studio with the C++ workload: https://visualstudio.microsoft.com/downloads/",
            "Or install MinGW-w64 (https://www.mingw-w64.org/downloads/) and add its bin directory to PATH",
        ],
        (Language::Cpp, HostOs::MacOs) => &[
            "Install the command line tools: `xcode-select --install`",
            "Or install GCC with Homebrew: `brew install gcc`",
        ],
        (Language::Cpp, _) => &[
            "Ubuntu/Debian: `sudo apt update && sudo apt install build-essential`",
            "Fedora: `sudo dnf groupinstall \"Development Tools\"`",
            "Arch Linux: `sudo pacman -S base-devel`",
        ],

        (Language::Php, HostOs::Windows) => &[
            "Download PHP from https://www.php.net/downloads.php and add it to PATH",
            "Or use a bundle such as XAMPP: https://www.apachefriends.org/",
        ],
        (Language::Php, HostOs::MacOs) => &["Install with Homebrew: `brew install php`"],
        (Language::Php, _) => &[
            "Ubuntu/Debian: `sudo apt update && sudo apt install php php-cli`",
            "Fedora: `sudo dnf install php php-cli`",
        ],

        (Language::Ruby, HostOs::Windows) => &[
            "Download RubyInstaller from https://rubyinstaller.org/",
        ],
        (Language::Ruby, HostOs::MacOs) => &["Install with Homebrew: `brew install ruby`"],
        (Language::Ruby, _) => &[
            "Ubuntu/Debian: `sudo apt update && sudo apt install ruby-full`",
            "Fedora: `sudo dnf install ruby`",
        ],

        (Language::R, HostOs::Windows) => &[
            "Download R from https://cran.r-project.org/bin/windows/base/",
            "Add the R bin directory to PATH so `Rscript` is found",
        ],
        (Language::R, HostOs::MacOs) => &[
            "Download R from https://cran.r-project.org/bin/macosx/",
            "Or install with Homebrew: `brew install r`",
        ],
        (Language::R, _) => &[
            "Ubuntu/Debian: `sudo apt update && sudo apt install r-base r-base-dev`",
            "Fedora: `sudo dnf install R`",
        ],

        (Language::Shell, HostOs::Windows) => &[
            "Install Git for Windows (https://git-scm.com/download/win), which ships `sh`",
            "Or enable WSL: `wsl --install`",
        ],
        (Language::Shell, _) => &["A POSIX `sh` is part of the base system; check your PATH"],
    };

    let mut guide = format!(
        "To install {} on {}:\n",
        language.display_name(),
        os.display_name()
    );
    for (idx, step) in steps.iter().enumerate() {
        guide.push_str(&format!("{}. {}\n", idx + 1, step));
    }
    guide
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_language_has_guidance_on_every_os() {
        for lang in Language::ALL {
            for os in [HostOs::Windows, HostOs::MacOs, HostOs::Linux, HostOs::Other] {
                let guide = install_guide(lang, os);
                assert!(guide.contains("1. "), "{lang} on {os:?} has no steps");
                assert!(guide.contains(lang.display_name()));
            }
        }
    }

    #[test]
    fn test_guidance_is_os_specific() {
        let mac = install_guide(Language::JavaScript, HostOs::MacOs);
        let linux = install_guide(Language::JavaScript, HostOs::Linux);
        assert!(mac.contains("brew install node"));
        assert!(linux.contains("apt install nodejs npm"));
        assert!(!linux.contains("brew"));
    }
}
